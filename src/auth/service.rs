use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::refresh::RefreshTokenStore;
use crate::auth::token::{Claims, TokenSigner};
use crate::clock::Clock;
use crate::db::TokenState;
use crate::error::AuthError;
use crate::Result;

/// Result of a login or refresh.
#[derive(Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub subject: String,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("subject", &self.subject)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Login, refresh-token rotation and logout.
pub struct AuthService {
    signer: Arc<TokenSigner>,
    refresh_tokens: RefreshTokenStore,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    revoke_family_on_reuse: bool,
    reuse_grace: Duration,
}

impl AuthService {
    pub fn new(
        signer: Arc<TokenSigner>,
        refresh_tokens: RefreshTokenStore,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            refresh_tokens,
            verifier,
            clock,
            revoke_family_on_reuse: false,
            reuse_grace: Duration::zero(),
        }
    }

    /// Replaying an already-rotated secret revokes every token in its chain.
    pub fn with_family_revocation(mut self, enabled: bool) -> Self {
        self.revoke_family_on_reuse = enabled;
        self
    }

    /// Replays arriving less than `grace` after the record was rotated are
    /// losers of a concurrent refresh, not reuse.
    pub fn with_reuse_grace(mut self, grace: Duration) -> Self {
        self.reuse_grace = grace;
        self
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthTokens> {
        let user = self.verifier.verify(username, password).await?;

        let access_token = self.signer.issue_access_token(&user.username, user.id)?;
        let refresh = self.refresh_tokens.generate_and_store(user.id, &user.username).await?;

        info!(user_id = %user.id, family_id = %refresh.record.family_id, "Login succeeded");
        Ok(AuthTokens {
            access_token,
            access_expires_at: self.clock.now() + self.signer.ttl(),
            refresh_token: refresh.raw,
            refresh_expires_at: refresh.record.expires_at,
            subject: user.username,
        })
    }

    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<AuthTokens> {
        let record = self
            .refresh_tokens
            .lookup_by_raw(raw_refresh_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = self.clock.now();
        match record.state(now) {
            TokenState::Active => {}
            TokenState::Revoked => {
                let just_rotated = record
                    .rotated_at
                    .map_or(false, |rotated_at| now - rotated_at < self.reuse_grace);
                warn!(
                    token_id = %record.id,
                    family_id = %record.family_id,
                    user_id = %record.user_id,
                    just_rotated,
                    "Revoked refresh token presented"
                );
                if !just_rotated {
                    self.on_reuse(record.family_id).await;
                }
                return Err(AuthError::TokenRevoked.into());
            }
            TokenState::Expired => {
                if let Err(e) = self.refresh_tokens.delete(&record).await {
                    warn!(token_id = %record.id, error = %e, "Failed to delete expired refresh token");
                }
                return Err(AuthError::TokenExpired.into());
            }
        }

        // Signing is pure, so do it before touching storage.
        let access_token = self.signer.issue_access_token(&record.subject, record.user_id)?;

        let Some(next) = self.refresh_tokens.rotate(&record).await? else {
            warn!(token_id = %record.id, "Refresh token was rotated concurrently");
            return Err(AuthError::TokenRevoked.into());
        };

        info!(user_id = %record.user_id, family_id = %record.family_id, "Refresh token rotated");
        Ok(AuthTokens {
            access_token,
            access_expires_at: self.clock.now() + self.signer.ttl(),
            refresh_token: next.raw,
            refresh_expires_at: next.record.expires_at,
            subject: record.subject,
        })
    }

    /// Revokes the token if it exists. Unknown tokens succeed silently.
    pub async fn logout(&self, raw_refresh_token: &str) -> Result<()> {
        if let Some(record) = self.refresh_tokens.lookup_by_raw(raw_refresh_token).await? {
            self.refresh_tokens.revoke(&record).await?;
            info!(user_id = %record.user_id, token_id = %record.id, "Logged out");
        }
        Ok(())
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.signer.verify(token)
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64> {
        let revoked = self.refresh_tokens.revoke_all_for_user(user_id).await?;
        info!(%user_id, revoked, "Revoked all refresh tokens for user");
        Ok(revoked)
    }

    async fn on_reuse(&self, family_id: Uuid) {
        if !self.revoke_family_on_reuse {
            return;
        }
        match self.refresh_tokens.revoke_family(family_id).await {
            Ok(revoked) => warn!(%family_id, revoked, "Revoked refresh token family after reuse"),
            Err(e) => warn!(%family_id, error = %e, "Failed to revoke refresh token family"),
        }
    }
}
