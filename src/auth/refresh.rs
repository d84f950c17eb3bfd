use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{RefreshTokenRecord, RefreshTokenRepository};
use crate::Result;

const SECRET_BYTES: usize = 32;

/// A freshly minted refresh token. `raw` exists only here and on the client.
pub struct IssuedRefreshToken {
    pub raw: String,
    pub record: RefreshTokenRecord,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("raw", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// 256 random bits, URL-safe base64 without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of the raw secret. The only form that is stored or compared.
pub fn hash_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct RefreshTokenStore {
    repository: Arc<dyn RefreshTokenRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RefreshTokenStore {
    pub fn new(repository: Arc<dyn RefreshTokenRepository>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { repository, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mint(&self, user_id: Uuid, subject: &str, family_id: Uuid) -> IssuedRefreshToken {
        let raw = generate_secret();
        let now = self.clock.now();
        let record = RefreshTokenRecord::new(
            hash_secret(&raw),
            user_id,
            subject.to_string(),
            family_id,
            now,
            now + self.ttl,
        );
        IssuedRefreshToken { raw, record }
    }

    /// Starts a new rotation chain for `user_id`.
    pub async fn generate_and_store(&self, user_id: Uuid, subject: &str) -> Result<IssuedRefreshToken> {
        let issued = self.mint(user_id, subject, Uuid::new_v4());
        self.repository.insert(&issued.record).await?;
        debug!(token_id = %issued.record.id, family_id = %issued.record.family_id, %user_id, "Stored refresh token");
        Ok(issued)
    }

    pub async fn lookup_by_raw(&self, raw: &str) -> Result<Option<RefreshTokenRecord>> {
        self.repository.find_by_hash(&hash_secret(raw)).await
    }

    pub async fn revoke(&self, record: &RefreshTokenRecord) -> Result<()> {
        if self.repository.revoke(record.id).await? {
            debug!(token_id = %record.id, "Revoked refresh token");
        }
        Ok(())
    }

    /// Revokes `record` and issues its successor in the same family.
    ///
    /// `None` means the record had already been revoked, typically by a
    /// concurrent rotation that won.
    pub async fn rotate(&self, record: &RefreshTokenRecord) -> Result<Option<IssuedRefreshToken>> {
        let issued = self.mint(record.user_id, &record.subject, record.family_id);
        if self.repository.rotate(record.id, &issued.record).await? {
            debug!(old_token_id = %record.id, new_token_id = %issued.record.id, family_id = %record.family_id, "Rotated refresh token");
            Ok(Some(issued))
        } else {
            Ok(None)
        }
    }

    pub async fn delete(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.repository.delete(record.id).await
    }

    pub async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        self.repository.revoke_family(family_id).await
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        self.repository.revoke_all_for_user(user_id).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let purged = self.repository.delete_expired(self.clock.now()).await?;
        if purged > 0 {
            info!(purged, "Purged expired refresh tokens");
        }
        Ok(purged)
    }
}
