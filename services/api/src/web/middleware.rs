//! services/api/src/web/middleware.rs
//!
//! Authentication, owner and subscription middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use bookworm_core::domain::Identity;
use bookworm_core::policy::evaluate_access;
use bookworm_core::ports::SubscriptionStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::HttpError;
use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "bw_session";

/// The raw token of the session that authenticated the request.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Pulls the session token out of the `Cookie` header.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let c = c.trim();
            c.strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .filter(|token| !token.is_empty())
                .map(str::to_string)
        })
}

/// Middleware that validates the session cookie.
///
/// If valid, inserts the `Identity` and `SessionToken` into request extensions
/// for handlers to use. If invalid, missing or expired, returns 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let token =
        session_token_from_headers(req.headers()).ok_or(HttpError::AuthenticationRequired)?;

    let identity = state
        .sessions
        .resolve(&token)
        .await
        .map_err(|e| {
            error!("Failed to resolve auth session: {}", e);
            HttpError::Internal
        })?
        .ok_or(HttpError::AuthenticationRequired)?;

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(SessionToken(token));
    Ok(next.run(req).await)
}

/// Middleware that only lets owner sessions through. Must run after `require_auth`.
pub async fn require_owner(req: Request, next: Next) -> Result<Response, HttpError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or(HttpError::AuthenticationRequired)?;
    if !identity.is_owner {
        return Err(HttpError::OwnerRequired);
    }
    Ok(next.run(req).await)
}

/// Middleware that applies the access policy to paid routes. Must run after `require_auth`.
pub async fn require_access(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or(HttpError::AuthenticationRequired)?;

    let subscription = if identity.is_owner {
        None
    } else {
        state.db.get_subscription(identity.user_id).await?
    };

    let grant = evaluate_access(
        &identity,
        subscription.as_ref(),
        Utc::now(),
        state.trial_window(),
    )?;
    debug!("Access granted to {}: {:?}", identity.user_id, grant);

    req.extensions_mut().insert(grant);
    Ok(next.run(req).await)
}
