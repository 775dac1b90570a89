//! services/api/src/web/owner.rs
//!
//! Owner elevation of the current session through the unlock code.

use axum::{extract::State, Extension, Json};
use bookworm_core::domain::Identity;
use bookworm_core::ports::CredentialStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::HttpError;
use crate::web::extract::ApiJson;
use crate::web::middleware::SessionToken;
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct UnlockRequest {
    pub code: String,
}

#[derive(Serialize, ToSchema)]
pub struct OwnerStatusResponse {
    pub ok: bool,
    pub is_owner: bool,
}

/// POST /owner/unlock - Elevate the current session to owner
#[utoipa::path(
    post,
    path = "/owner/unlock",
    request_body = UnlockRequest,
    responses(
        (status = 200, description = "Session elevated", body = OwnerStatusResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Wrong or unconfigured unlock code")
    )
)]
pub async fn unlock_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    ApiJson(req): ApiJson<UnlockRequest>,
) -> Result<Json<OwnerStatusResponse>, HttpError> {
    if !state.sessions.unlock_owner(&token, &req.code).await? {
        warn!("Rejected owner unlock attempt for user {}", identity.user_id);
        return Err(HttpError::OwnerRequired);
    }

    info!("Owner mode unlocked for user {}", identity.user_id);
    Ok(Json(OwnerStatusResponse {
        ok: true,
        is_owner: true,
    }))
}

/// POST /owner/lock - Drop owner elevation from the current session
#[utoipa::path(
    post,
    path = "/owner/lock",
    responses(
        (status = 200, description = "Session elevation removed", body = OwnerStatusResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn lock_handler(
    State(state): State<Arc<AppState>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<OwnerStatusResponse>, HttpError> {
    state.sessions.lock_owner(&token).await?;

    // A persistent owner flag on the account outlives the session lock.
    let still_owner = state
        .db
        .get_user_by_id(identity.user_id)
        .await
        .map(|user| user.is_owner)?;

    Ok(Json(OwnerStatusResponse {
        ok: true,
        is_owner: still_owner,
    }))
}
