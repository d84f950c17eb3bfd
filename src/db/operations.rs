use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::db::models::{RefreshTokenRecord, User};
use crate::db::{RefreshTokenRepository, UserRepository};
use crate::error::DatabaseError;
use crate::Result;

const REFRESH_TOKEN_COLUMNS: &str =
    "id, token_hash, user_id, subject, family_id, expires_at, created_at, revoked, rotated_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, roles, enabled, created_at";

/// PostgreSQL-backed repositories sharing one connection pool.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn get_pool_status(&self) -> Result<DbPoolStatus> {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        Ok(DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        })
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_with_transaction(
        record: &RefreshTokenRecord,
        transaction: &mut Transaction<'_, Postgres>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token_hash, user_id, subject, family_id, expires_at, created_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(&record.subject)
        .bind(record.family_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.revoked)
        .execute(&mut **transaction)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RefreshTokenRepository for DbOperations {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        let mut transaction = self.begin_transaction().await?;

        match Self::insert_with_transaction(record, &mut transaction).await {
            Ok(()) => {
                transaction.commit().await?;
                Ok(())
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn revoke(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn rotate(&self, old_id: Uuid, replacement: &RefreshTokenRecord) -> Result<bool> {
        let mut transaction = self.begin_transaction().await?;

        // The conditional update takes the row lock; a concurrent rotation of the
        // same record blocks here and then sees zero rows affected.
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, rotated_at = $2 WHERE id = $1 AND revoked = FALSE",
        )
        .bind(old_id)
        .bind(replacement.created_at)
        .execute(&mut *transaction)
        .await;

        match revoked {
            Ok(result) if result.rows_affected() == 1 => {}
            Ok(_) => {
                transaction.rollback().await?;
                return Ok(false);
            }
            Err(e) => {
                transaction.rollback().await?;
                return Err(e.into());
            }
        }

        match Self::insert_with_transaction(replacement, &mut transaction).await {
            Ok(()) => {
                transaction.commit().await?;
                Ok(true)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE family_id = $1 AND revoked = FALSE",
        )
        .bind(family_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserRepository for DbOperations {
    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, roles, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(user.enabled)
        .bind(user.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}
