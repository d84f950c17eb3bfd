//! Authentication module for the auth server
//!
//! Access token signing, refresh token storage and rotation, credential
//! verification and login rate limiting, plus the HTTP handlers that expose them.

pub mod cookie;
pub mod credentials;
pub mod handlers;
pub mod rate_limit;
pub mod refresh;
pub mod service;
pub mod token;

pub use cookie::RefreshCookie;
pub use credentials::{CredentialVerifier, UserDirectory, VerifiedUser};
pub use rate_limit::{client_identity, Admission, RateLimitConfig, RateLimiter};
pub use refresh::{IssuedRefreshToken, RefreshTokenStore};
pub use service::{AuthService, AuthTokens};
pub use token::{Claims, TokenSigner};
