//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user registration, login, logout and the
//! current-identity summary.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use bookworm_core::domain::{Identity, Plan, SubscriptionStatus, User};
use bookworm_core::policy::{evaluate_access, AccessGrant};
use bookworm_core::ports::{AnalyticsStore, SubscriptionStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::error::HttpError;
use crate::web::extract::ApiJson;
use crate::web::middleware::{session_token_from_headers, SESSION_COOKIE};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    pub is_owner: bool,
}

impl From<User> for AuthResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            is_owner: user.is_owner,
        }
    }
}

/// The caller's identity plus a summary of what the access policy decides.
#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
    pub plan: String,
    pub subscription_status: String,
    pub has_access: bool,
    /// `owner`, `trial`, `subscription` or `none`.
    pub access_tier: String,
    pub trial_ends_at: DateTime<Utc>,
}

//=========================================================================================
// Cookies
//=========================================================================================

fn cookie_attributes(config: &Config, max_age: i64) -> String {
    let mut attributes = format!("HttpOnly; SameSite=Lax; Path=/; Max-Age={}", max_age);
    if config.cookie_secure {
        attributes.push_str("; Secure");
    }
    if let Some(domain) = &config.cookie_domain {
        attributes.push_str(&format!("; Domain={}", domain));
    }
    attributes
}

pub fn session_cookie(config: &Config, token: &str) -> String {
    let max_age = chrono::Duration::days(config.session_ttl_days).num_seconds();
    format!("{}={}; {}", SESSION_COOKIE, token, cookie_attributes(config, max_age))
}

pub fn cleared_session_cookie(config: &Config) -> String {
    format!("{}=; {}", SESSION_COOKIE, cookie_attributes(config, 0))
}

async fn record(state: &AppState, user_id: Uuid, event_type: &str) {
    if let Err(e) = state.db.record_event(Some(user_id), event_type, &json!({})).await {
        warn!("Failed to record {} event: {}", event_type, e);
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/register - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid email, short password or taken email"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let user = state.credentials.register(&req.email, &req.password).await?;
    let token = state.sessions.create_session(user.user_id).await?;
    record(&state, user.user_id, "signup").await;

    let cookie = session_cookie(&state.config, &token);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let user = state
        .credentials
        .verify(&req.email, &req.password)
        .await?
        .ok_or(HttpError::InvalidCredentials)?;

    let token = state.sessions.create_session(user.user_id).await?;
    record(&state, user.user_id, "login").await;
    info!("User {} logged in", user.user_id);

    let cookie = session_cookie(&state.config, &token);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful; the cookie is cleared")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    if let Some(token) = session_token_from_headers(&headers) {
        state.sessions.revoke(&token).await?;
    }

    let cookie = cleared_session_cookie(&state.config);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    ))
}

/// GET /auth/me - The current identity and access summary
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MeResponse>, HttpError> {
    let subscription = state.db.get_subscription(identity.user_id).await?;
    let decision = evaluate_access(
        &identity,
        subscription.as_ref(),
        Utc::now(),
        state.trial_window(),
    );
    let access_tier = match &decision {
        Ok(AccessGrant::Owner) => "owner",
        Ok(AccessGrant::Trial { .. }) => "trial",
        Ok(AccessGrant::Subscription { .. }) => "subscription",
        Err(_) => "none",
    };

    Ok(Json(MeResponse {
        user_id: identity.user_id,
        email: identity.email,
        is_owner: identity.is_owner,
        created_at: identity.account_created_at,
        plan: subscription
            .as_ref()
            .map_or(Plan::Free, |s| s.plan)
            .to_string(),
        subscription_status: subscription
            .as_ref()
            .map_or(SubscriptionStatus::Inactive, |s| s.status)
            .to_string(),
        has_access: decision.is_ok(),
        access_tier: access_tier.to_string(),
        trial_ends_at: identity.account_created_at + state.trial_window(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_carries_configured_attributes() {
        let mut config = Config::for_tests();
        let plain = session_cookie(&config, "tok");
        assert!(plain.starts_with("bw_session=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=2592000"));
        assert!(!plain.contains("Secure"));

        config.cookie_secure = true;
        config.cookie_domain = Some("bookworm.example".into());
        let hardened = session_cookie(&config, "tok");
        assert!(hardened.contains("; Secure"));
        assert!(hardened.ends_with("; Domain=bookworm.example"));
        assert!(cleared_session_cookie(&config).contains("Max-Age=0"));
    }
}
