use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::{test, web, App};
use authmaster_server::auth::handlers::{self, TokenResponse};
use authmaster_server::{AppState, ManualClock, Settings};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

async fn test_state() -> (AppState, Arc<ManualClock>) {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let clock = Arc::new(ManualClock::default());
    let state = AppState::with_clock(config, clock.clone()).await.unwrap();
    (state, clock)
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(handlers::configure),
        )
        .await
    };
}

fn refresh_cookie(resp: &ServiceResponse) -> Cookie<'static> {
    resp.response()
        .cookies()
        .find(|c| c.name() == "refresh_token")
        .map(|c| c.into_owned())
        .expect("refresh cookie set")
}

#[actix_web::test]
async fn test_register_and_login() {
    let (state, _) = test_state().await;
    let app = init_app!(state);

    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "correctpw"
        }))
        .send_request(&app)
        .await;
    assert_eq!(register_response.status(), 201);

    let login_response = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "correctpw" }))
        .send_request(&app)
        .await;
    assert_eq!(login_response.status(), 200);

    let cookie = refresh_cookie(&login_response);
    assert!(!cookie.value().is_empty());
    assert_eq!(cookie.http_only(), Some(true));

    let body: TokenResponse = test::read_body_json(login_response).await;
    assert_eq!(body.username, "alice");
    assert_eq!(body.token_type, "Bearer");
    assert_eq!(body.expires_in, 900);
    assert!(!body.access_token.contains(cookie.value()));
}

#[actix_web::test]
async fn test_invalid_login() {
    let (state, _) = test_state().await;
    let app = init_app!(state);

    let response = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "nonexistent", "password": "wrongpassword" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["message"], "Authentication error: Invalid credentials");
}

#[actix_web::test]
async fn test_invalid_registration() {
    let (state, _) = test_state().await;
    let app = init_app!(state);

    let response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": ""
        }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn test_refresh_rotates_cookie() {
    let (state, _) = test_state().await;
    state.users.register("alice", "alice@example.com", "correctpw").await.unwrap();
    let app = init_app!(state);

    let login = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "correctpw" }))
        .send_request(&app)
        .await;
    let first = refresh_cookie(&login);

    let refreshed = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .cookie(first.clone())
        .send_request(&app)
        .await;
    assert_eq!(refreshed.status(), 200);
    let second = refresh_cookie(&refreshed);
    assert_ne!(first.value(), second.value());

    let replay = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .cookie(first)
        .send_request(&app)
        .await;
    assert_eq!(replay.status(), 401);

    let missing = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .send_request(&app)
        .await;
    assert_eq!(missing.status(), 401);
}

#[actix_web::test]
async fn test_logout() {
    let (state, _) = test_state().await;
    state.users.register("alice", "alice@example.com", "correctpw").await.unwrap();
    let app = init_app!(state);

    let login = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "correctpw" }))
        .send_request(&app)
        .await;
    let cookie = refresh_cookie(&login);

    let logout = test::TestRequest::post()
        .uri("/api/auth/logout")
        .cookie(cookie.clone())
        .send_request(&app)
        .await;
    assert_eq!(logout.status(), 200);
    assert_eq!(refresh_cookie(&logout).value(), "");

    let refresh = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .cookie(cookie)
        .send_request(&app)
        .await;
    assert_eq!(refresh.status(), 401);

    // no cookie and unknown cookie both succeed
    let anonymous = test::TestRequest::post()
        .uri("/api/auth/logout")
        .send_request(&app)
        .await;
    assert_eq!(anonymous.status(), 200);

    let unknown = test::TestRequest::post()
        .uri("/api/auth/logout")
        .cookie(Cookie::new("refresh_token", "never-issued"))
        .send_request(&app)
        .await;
    assert_eq!(unknown.status(), 200);
}

#[actix_web::test]
async fn test_login_rate_limited_per_client() {
    let (state, clock) = test_state().await;
    let app = init_app!(state);

    for _ in 0..5 {
        let response = test::TestRequest::post()
            .uri("/api/auth/login")
            .insert_header(("X-Forwarded-For", "203.0.113.9"))
            .set_json(json!({ "username": "alice", "password": "wrongpw1" }))
            .send_request(&app)
            .await;
        assert_eq!(response.status(), 401);
    }

    let limited = test::TestRequest::post()
        .uri("/api/auth/login")
        .insert_header(("X-Forwarded-For", "203.0.113.9"))
        .set_json(json!({ "username": "alice", "password": "wrongpw1" }))
        .send_request(&app)
        .await;
    assert_eq!(limited.status(), 429);
    assert_eq!(limited.headers().get("Retry-After").unwrap(), "60");

    let other_client = test::TestRequest::post()
        .uri("/api/auth/login")
        .insert_header(("X-Forwarded-For", "203.0.113.10"))
        .set_json(json!({ "username": "alice", "password": "wrongpw1" }))
        .send_request(&app)
        .await;
    assert_eq!(other_client.status(), 401);

    // refresh is not on the allowlist
    for _ in 0..10 {
        let response = test::TestRequest::post()
            .uri("/api/auth/refresh")
            .insert_header(("X-Forwarded-For", "203.0.113.9"))
            .send_request(&app)
            .await;
        assert_eq!(response.status(), 401);
    }

    clock.advance(Duration::seconds(61));
    let after_window = test::TestRequest::post()
        .uri("/api/auth/login")
        .insert_header(("X-Forwarded-For", "203.0.113.9"))
        .set_json(json!({ "username": "alice", "password": "wrongpw1" }))
        .send_request(&app)
        .await;
    assert_eq!(after_window.status(), 401);
}

#[actix_web::test]
async fn test_dashboard_requires_valid_access_token() {
    let (state, clock) = test_state().await;
    state.users.register("alice", "alice@example.com", "correctpw").await.unwrap();
    let app = init_app!(state);

    let login = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "correctpw" }))
        .send_request(&app)
        .await;
    let body: TokenResponse = test::read_body_json(login).await;

    let dashboard = test::TestRequest::get()
        .uri("/api/dashboard")
        .insert_header(("Authorization", format!("Bearer {}", body.access_token)))
        .send_request(&app)
        .await;
    assert_eq!(dashboard.status(), 200);
    let payload: serde_json::Value = test::read_body_json(dashboard).await;
    assert_eq!(payload["user"], "alice");
    assert_eq!(payload["roles"], json!(["ROLE_USER"]));

    let admin = test::TestRequest::get()
        .uri("/api/admin/overview")
        .insert_header(("Authorization", format!("Bearer {}", body.access_token)))
        .send_request(&app)
        .await;
    assert_eq!(admin.status(), 403);

    let anonymous = test::TestRequest::get().uri("/api/dashboard").send_request(&app).await;
    assert_eq!(anonymous.status(), 401);

    clock.advance(Duration::minutes(16));
    let expired = test::TestRequest::get()
        .uri("/api/dashboard")
        .insert_header(("Authorization", format!("Bearer {}", body.access_token)))
        .send_request(&app)
        .await;
    assert_eq!(expired.status(), 401);
}
