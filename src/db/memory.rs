use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{RefreshTokenRecord, User};
use crate::db::{RefreshTokenRepository, UserRepository};
use crate::error::DatabaseError;
use crate::Result;

#[derive(Debug, Default)]
struct TokenTable {
    records: HashMap<Uuid, RefreshTokenRecord>,
    by_hash: HashMap<String, Uuid>,
}

impl TokenTable {
    fn insert(&mut self, record: &RefreshTokenRecord) -> Result<()> {
        if self.by_hash.contains_key(&record.token_hash) || self.records.contains_key(&record.id) {
            return Err(DatabaseError::Duplicate.into());
        }
        self.by_hash.insert(record.token_hash.clone(), record.id);
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&mut self, id: Uuid) -> Option<RefreshTokenRecord> {
        let record = self.records.remove(&id)?;
        self.by_hash.remove(&record.token_hash);
        Some(record)
    }

    fn revoke_where<F>(&mut self, predicate: F) -> u64
    where
        F: Fn(&RefreshTokenRecord) -> bool,
    {
        let mut revoked = 0;
        for record in self.records.values_mut() {
            if !record.revoked && predicate(record) {
                record.revoked = true;
                revoked += 1;
            }
        }
        revoked
    }
}

/// Refresh token records held in process memory.
///
/// Every mutation takes the write lock, so `rotate` is atomic with respect to
/// concurrent rotations of the same record.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokens {
    table: RwLock<TokenTable>,
}

impl InMemoryRefreshTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokens {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.table.write().await.insert(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let table = self.table.read().await;
        Ok(table
            .by_hash
            .get(token_hash)
            .and_then(|id| table.records.get(id))
            .cloned())
    }

    async fn revoke(&self, id: Uuid) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.records.get_mut(&id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            // already revoked, or deleted since it was looked up
            _ => Ok(false),
        }
    }

    async fn rotate(&self, old_id: Uuid, replacement: &RefreshTokenRecord) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.records.get(&old_id) {
            Some(old) if !old.revoked => {}
            _ => return Ok(false),
        }
        // insert first so a failure leaves the old record untouched
        table.insert(replacement)?;
        if let Some(old) = table.records.get_mut(&old_id) {
            old.revoked = true;
            old.rotated_at = Some(replacement.created_at);
        }
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.table.write().await.remove(id);
        Ok(())
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        Ok(self
            .table
            .write()
            .await
            .revoke_where(|record| record.family_id == family_id))
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        Ok(self
            .table
            .write()
            .await
            .revoke_where(|record| record.user_id == user_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut table = self.table.write().await;
        let expired: Vec<Uuid> = table
            .records
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.id)
            .collect();
        for id in &expired {
            table.remove(*id);
        }
        Ok(expired.len() as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn insert(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        let taken = users.values().any(|existing| {
            existing.username == user.username || existing.email.eq_ignore_ascii_case(&user.email)
        });
        if taken {
            return Err(DatabaseError::Duplicate.into());
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}
