use std::collections::BTreeSet;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::rate_limit::client_identity;
use crate::auth::service::AuthTokens;
use crate::error::AuthError;
use crate::{AppState, Result};

pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub username: String,
}

/// Verified caller plus the capabilities granted to it at this boundary.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub user_id: Uuid,
    pub capabilities: BTreeSet<String>,
}

impl Principal {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn require(&self, capability: &str) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(AuthError::Forbidden.into())
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            .route("/dashboard", web::get().to(dashboard))
            .route("/admin/overview", web::get().to(admin_overview)),
    );
}

fn admit(req: &HttpRequest, state: &AppState) -> Result<()> {
    let forwarded_for = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok());
    let peer_addr = req.peer_addr().map(|addr| addr.ip().to_string());
    let client = client_identity(
        forwarded_for,
        peer_addr.as_deref(),
        state.config.rate_limit.trust_forwarded_for,
    );

    state.rate_limiter.check(&client, req.path())?;
    Ok(())
}

fn token_response(state: &AppState, tokens: AuthTokens) -> HttpResponse {
    let cookie = state
        .refresh_cookie
        .issue(&tokens.refresh_token, state.config.auth.refresh_token_ttl());

    HttpResponse::Ok().cookie(cookie).json(TokenResponse {
        access_token: tokens.access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.auth.access_token_ttl_secs,
        username: tokens.subject,
    })
}

pub async fn register(
    http: HttpRequest,
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    admit(&http, &state)?;
    info!("Received registration request for username: {}", req.username);

    match state.users.register(&req.username, &req.email, &req.password).await {
        Ok(user) => Ok(HttpResponse::Created().json(serde_json::json!({
            "id": user.id,
            "username": user.username,
        }))),
        Err(e) => {
            error!("Registration failed for username: {}: {}", req.username, e);
            Err(e)
        }
    }
}

pub async fn login(
    http: HttpRequest,
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    admit(&http, &state)?;
    info!("Received login request for username: {}", req.username);

    match state.auth_service.login(&req.username, &req.password).await {
        Ok(tokens) => {
            info!("Login successful for username: {}", req.username);
            Ok(token_response(&state, tokens))
        }
        Err(e) => {
            error!("Login failed for username: {}: {}", req.username, e);
            Err(e)
        }
    }
}

pub async fn refresh(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    admit(&http, &state)?;

    let raw = state
        .refresh_cookie
        .extract(&http)
        .ok_or(AuthError::InvalidToken)?;
    let tokens = state.auth_service.refresh(&raw).await?;

    Ok(token_response(&state, tokens))
}

pub async fn logout(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    admit(&http, &state)?;

    if let Some(raw) = state.refresh_cookie.extract(&http) {
        state.auth_service.logout(&raw).await?;
    }

    Ok(HttpResponse::Ok()
        .cookie(state.refresh_cookie.clear())
        .json(serde_json::json!({
            "message": "Logged out"
        })))
}

/// Resolves the bearer access token into a [`Principal`].
pub async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<Principal> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AuthError::Unauthorized)?;

    let claims = state.auth_service.verify_access_token(token)?;
    let user = state
        .users
        .find_by_id(claims.uid)
        .await?
        .filter(|user| user.enabled)
        .ok_or(AuthError::Unauthorized)?;

    Ok(Principal {
        subject: claims.sub,
        user_id: claims.uid,
        capabilities: user.roles.into_iter().collect(),
    })
}

pub async fn dashboard(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let principal = authenticate(&http, &state).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Welcome to your dashboard",
        "user": principal.subject,
        "roles": principal.capabilities,
    })))
}

pub async fn admin_overview(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let principal = authenticate(&http, &state).await?;
    principal.require(ADMIN_ROLE)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "admin only data"
    })))
}
