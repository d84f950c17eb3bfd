//! Persistence for users and refresh tokens.
//!
//! Two backends implement the repository traits: an in-process store used by
//! default and in tests, and PostgreSQL via [`DbOperations`].

pub mod memory;
pub mod models;
pub mod operations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;

pub use memory::{InMemoryRefreshTokens, InMemoryUsers};
pub use models::{RefreshTokenRecord, TokenState, User};
pub use operations::{DbOperations, DbPoolStatus};

/// Storage for refresh token records, addressed by token hash.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Fails with `DatabaseError::Duplicate` if the hash is already stored.
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Marks the record revoked. Returns `false` if it was already revoked or no
    /// longer exists.
    async fn revoke(&self, id: Uuid) -> Result<bool>;

    /// Revokes `old_id` and inserts `replacement` as one unit.
    ///
    /// Returns `false`, with nothing changed, when `old_id` was already revoked or
    /// no longer exists. On success the old record's `rotated_at` is set to the
    /// replacement's `created_at`.
    /// If the insert fails the revocation is rolled back.
    async fn rotate(&self, old_id: Uuid, replacement: &RefreshTokenRecord) -> Result<bool>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Returns the number of records newly revoked.
    async fn revoke_family(&self, family_id: Uuid) -> Result<u64>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `DatabaseError::Duplicate` on a taken username or email.
    async fn insert(&self, user: &User) -> Result<()>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
}
