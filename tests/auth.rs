use authmaster_server::{
    auth::{Admission, AuthService, RateLimitConfig, RateLimiter, RefreshTokenStore, TokenSigner, UserDirectory},
    db::{InMemoryRefreshTokens, InMemoryUsers},
    error::{AppError, AuthError},
    ManualClock,
};
use chrono::Duration;
use futures::future::join_all;
use std::sync::Arc;

const SIGNING_KEY: &[u8] = b"integration_signing_key_at_least_32_bytes";

struct Harness {
    service: Arc<AuthService>,
    clock: Arc<ManualClock>,
}

async fn setup() -> Harness {
    let clock = Arc::new(ManualClock::default());
    let directory = Arc::new(UserDirectory::new(Arc::new(InMemoryUsers::new()), 4).unwrap());
    directory
        .register("alice", "alice@example.com", "correctpw")
        .await
        .unwrap();

    let signer = Arc::new(TokenSigner::new(SIGNING_KEY, Duration::minutes(15), clock.clone()));
    let store = RefreshTokenStore::new(Arc::new(InMemoryRefreshTokens::new()), clock.clone(), Duration::days(14));
    let service = AuthService::new(signer, store, directory, clock.clone());

    Harness {
        service: Arc::new(service),
        clock,
    }
}

fn auth_error<T>(result: Result<T, AppError>) -> AuthError {
    match result {
        Err(AppError::AuthError(e)) => e,
        Err(other) => panic!("expected auth error, got {}", other),
        Ok(_) => panic!("expected auth error, got success"),
    }
}

#[test_log::test(tokio::test)]
async fn test_auth_flow() {
    let h = setup().await;

    let first = h.service.login("alice", "correctpw").await.unwrap();
    assert_eq!(first.subject, "alice");

    let second = h.service.refresh(&first.refresh_token).await.unwrap();
    assert_eq!(second.subject, "alice");

    assert_eq!(auth_error(h.service.refresh(&first.refresh_token).await), AuthError::TokenRevoked);

    let third = h.service.refresh(&second.refresh_token).await.unwrap();
    let claims = h.service.verify_access_token(&third.access_token).unwrap();
    assert_eq!(claims.sub, "alice");
}

#[tokio::test]
async fn test_invalid_credentials() {
    let h = setup().await;

    assert_eq!(auth_error(h.service.login("alice", "wrongpw").await), AuthError::InvalidCredentials);
    assert_eq!(auth_error(h.service.login("nobody", "correctpw").await), AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_access_token_lifetime() {
    let h = setup().await;
    let tokens = h.service.login("alice", "correctpw").await.unwrap();

    assert!(h.service.verify_access_token(&tokens.access_token).is_ok());

    h.clock.advance(Duration::minutes(16));
    assert_eq!(auth_error(h.service.verify_access_token(&tokens.access_token)), AuthError::Expired);
}

#[tokio::test]
async fn test_logout_unknown_token_succeeds() {
    let h = setup().await;
    assert!(h.service.logout("this-was-never-issued").await.is_ok());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_refresh_has_one_winner() {
    let h = setup().await;
    let tokens = h.service.login("alice", "correctpw").await.unwrap();

    let attempts = (0..16).map(|_| {
        let service = h.service.clone();
        let raw = tokens.refresh_token.clone();
        tokio::spawn(async move { service.refresh(&raw).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);

    for result in results.iter().filter(|r| r.is_err()) {
        match result {
            Err(AppError::AuthError(AuthError::TokenRevoked)) => {}
            other => panic!("expected TokenRevoked, got {:?}", other.as_ref().err()),
        }
    }

    // the single child is live
    assert!(h.service.refresh(&winners[0].refresh_token).await.is_ok());
}

#[test]
fn test_rate_limiter_window() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::new(RateLimitConfig::default(), clock.clone());

    for _ in 0..5 {
        assert!(limiter.admit("198.51.100.4", "/api/auth/login").is_allowed());
    }
    assert!(matches!(
        limiter.admit("198.51.100.4", "/api/auth/login"),
        Admission::Denied { .. }
    ));

    clock.advance(Duration::seconds(61));
    assert!(limiter.admit("198.51.100.4", "/api/auth/login").is_allowed());
}
