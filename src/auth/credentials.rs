use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{User, UserRepository};
use crate::error::{AppError, AuthError};
use crate::Result;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 64;

/// Identity established by a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub id: Uuid,
    pub username: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Fails with `AuthError::InvalidCredentials` on any rejection.
    async fn verify(&self, username: &str, password: &str) -> Result<VerifiedUser>;
}

/// User accounts with bcrypt password hashes.
pub struct UserDirectory {
    users: Arc<dyn UserRepository>,
    cost: u32,
    // compared against when the username is unknown so the miss costs one bcrypt run too
    dummy_hash: String,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserRepository>, cost: u32) -> Result<Self> {
        let dummy_hash = bcrypt::hash("dummy-password-for-timing", cost)?;
        Ok(Self { users, cost, dummy_hash })
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let username = username.trim();
        let email = email.trim();
        validate_registration(username, email, password)?;

        let password = password.to_string();
        let cost = self.cost;
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;

        let user = User::new(username.to_string(), email.to_string(), password_hash);
        self.users.insert(&user).await?;
        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.users.find_by_id(id).await
    }
}

fn validate_registration(username: &str, email: &str, password: &str) -> Result<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AppError::ValidationError(format!(
            "username must be between 1 and {} characters",
            MAX_USERNAME_LEN
        )));
    }
    let valid_email = email
        .split_once('@')
        .map_or(false, |(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(AppError::ValidationError("email address is invalid".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationError(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[async_trait]
impl CredentialVerifier for UserDirectory {
    async fn verify(&self, username: &str, password: &str) -> Result<VerifiedUser> {
        let user = self.users.find_by_username(username).await?;
        let hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;

        match user {
            Some(user) if matches && user.enabled => Ok(VerifiedUser {
                id: user.id,
                username: user.username,
            }),
            Some(user) if matches => {
                warn!(user_id = %user.id, "Login attempt for disabled account");
                Err(AuthError::InvalidCredentials.into())
            }
            _ => Err(AuthError::InvalidCredentials.into()),
        }
    }
}
