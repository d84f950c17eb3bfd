pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;

use std::sync::Arc;
use std::time::Duration;
use actix_web::HttpResponse;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthService, RateLimiter, RateLimitConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{DbOperations, RefreshTokenRecord, User};

use auth::{RefreshCookie, RefreshTokenStore, TokenSigner, UserDirectory};
use config::StorageBackend;
use db::{InMemoryRefreshTokens, InMemoryUsers, RefreshTokenRepository, UserRepository};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub users: Arc<UserDirectory>,
    pub rate_limiter: Arc<RateLimiter>,
    pub refresh_cookie: RefreshCookie,
    pub db: Option<DbOperations>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Builds the state on an explicit clock; tests pass a [`ManualClock`].
    pub async fn with_clock(config: Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        let tokens: Arc<dyn RefreshTokenRepository>;
        let users: Arc<dyn UserRepository>;
        let db = match config.database.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                tokens = Arc::new(InMemoryRefreshTokens::new());
                users = Arc::new(InMemoryUsers::new());
                None
            }
            StorageBackend::Postgres => {
                let url = config.database.url.as_deref().ok_or_else(|| {
                    AppError::ConfigError("database.url is required for the postgres backend".into())
                })?;
                let db = DbOperations::new_with_options(
                    url,
                    config.database.max_connections,
                    Duration::from_secs(config.database.acquire_timeout_secs),
                )
                .await?;
                db.migrate().await?;
                info!("Connected to PostgreSQL");
                tokens = Arc::new(db.clone());
                users = Arc::new(db.clone());
                Some(db)
            }
        };

        let signer = Arc::new(TokenSigner::new(
            config.auth.signing_key.as_bytes(),
            config.auth.access_token_ttl(),
            clock.clone(),
        ));
        let refresh_tokens = RefreshTokenStore::new(tokens, clock.clone(), config.auth.refresh_token_ttl());
        let directory = Arc::new(UserDirectory::new(users, config.auth.bcrypt_cost)?);
        let auth_service = AuthService::new(signer, refresh_tokens, directory.clone(), clock.clone())
            .with_family_revocation(config.auth.revoke_family_on_reuse)
            .with_reuse_grace(config.auth.reuse_grace());
        let rate_limiter = RateLimiter::new(RateLimitConfig::from(&config.rate_limit), clock);

        Ok(Self {
            refresh_cookie: RefreshCookie::new(&config.cookie),
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            users: directory,
            rate_limiter: Arc::new(rate_limiter),
            db,
        })
    }

    /// Evicts idle rate limit windows and expired refresh tokens.
    pub async fn run_maintenance(&self) -> Result<()> {
        self.rate_limiter.sweep();
        self.auth_service.refresh_tokens().purge_expired().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.close().await;
        }
        Ok(())
    }
}
