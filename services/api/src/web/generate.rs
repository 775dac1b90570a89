//! services/api/src/web/generate.rs
//!
//! Paid generation endpoints: chat text through the generation gateway and
//! images through the image provider.

use axum::{extract::State, Extension, Json};
use bookworm_core::domain::Identity;
use bookworm_core::gateway::GenerateCommand;
use bookworm_core::ports::{AnalyticsStore, ImageRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::adapters::image_llm::{SUPPORTED_QUALITIES, SUPPORTED_SIZES};
use crate::error::HttpError;
use crate::web::extract::ApiJson;
use crate::web::state::AppState;

pub const GENERATE_IMAGE_EVENT: &str = "generate_image";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_IMAGE_QUALITY: &str = "high";
pub const MAX_IMAGES: u8 = 4;
pub const NO_IMAGE_MESSAGE: &str = "ERROR: No URL returned from image API.";

//=========================================================================================
// Text Generation
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct GenerateRequest {
    pub prompt: String,
    /// A mode name or alias. Defaults to `auto`.
    pub mode: Option<String>,
    /// `deep` (default) or `super_deep`.
    pub depth: Option<String>,
    pub tab: Option<String>,
    pub project_id: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateResponse {
    pub response: String,
    pub mode: String,
    pub tab: String,
}

/// POST /generate - Generate writing in one of the creative modes
///
/// Provider failures are answered with 200 and an explanatory message in
/// `response`, so the chat surface always has something to show.
#[utoipa::path(
    post,
    path = "/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Generated text or a provider error message", body = GenerateResponse),
        (status = 400, description = "Empty prompt"),
        (status = 401, description = "Not authenticated"),
        (status = 402, description = "Trial over and no active subscription")
    )
)]
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<GenerateRequest>,
) -> Result<Json<GenerateResponse>, HttpError> {
    let outcome = state
        .gateway
        .generate(GenerateCommand {
            user_id: identity.user_id,
            prompt: req.prompt,
            mode: req.mode,
            depth: req.depth,
            tab: req.tab,
            project_id: req.project_id,
        })
        .await?;

    Ok(Json(GenerateResponse {
        response: outcome.response,
        mode: outcome.mode.as_str().to_string(),
        tab: outcome.tab,
    }))
}

//=========================================================================================
// Image Generation
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct GenerateImageRequest {
    pub prompt: String,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub n: Option<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateImageResponse {
    pub urls: Vec<String>,
}

fn image_request(req: GenerateImageRequest) -> Result<ImageRequest, HttpError> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(HttpError::Validation("Prompt must not be empty.".into()));
    }

    let size = req
        .size
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string());
    if !SUPPORTED_SIZES.contains(&size.as_str()) {
        return Err(HttpError::Validation(format!(
            "Unsupported size '{}'. Use one of: {}.",
            size,
            SUPPORTED_SIZES.join(", ")
        )));
    }

    let quality = req
        .quality
        .map(|q| q.trim().to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_IMAGE_QUALITY.to_string());
    if !SUPPORTED_QUALITIES.contains(&quality.as_str()) {
        return Err(HttpError::Validation(format!(
            "Unsupported quality '{}'. Use one of: {}.",
            quality,
            SUPPORTED_QUALITIES.join(", ")
        )));
    }

    let n = req.n.unwrap_or(1);
    if !(1..=MAX_IMAGES).contains(&n) {
        return Err(HttpError::Validation(format!(
            "n must be between 1 and {}.",
            MAX_IMAGES
        )));
    }

    Ok(ImageRequest {
        prompt,
        size,
        quality,
        n,
    })
}

/// POST /generate_image - Generate concept art
#[utoipa::path(
    post,
    path = "/generate_image",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Image URLs, or a single ERROR entry", body = GenerateImageResponse),
        (status = 400, description = "Invalid prompt, size, quality or count"),
        (status = 401, description = "Not authenticated"),
        (status = 402, description = "Trial over and no active subscription")
    )
)]
pub async fn generate_image_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, HttpError> {
    let request = image_request(req)?;

    let (urls, ok) = match state.images.generate_images(&request).await {
        Ok(urls) if urls.is_empty() => (vec![NO_IMAGE_MESSAGE.to_string()], false),
        Ok(urls) => (urls, true),
        Err(e) => {
            error!("Image generation failed for user {}: {}", identity.user_id, e);
            (vec![format!("ERROR: Image error: {}", e.detail())], false)
        }
    };

    let metadata = json!({
        "size": request.size,
        "quality": request.quality,
        "n": request.n,
        "ok": ok,
    });
    if let Err(e) = state
        .db
        .record_event(Some(identity.user_id), GENERATE_IMAGE_EVENT, &metadata)
        .await
    {
        warn!("Failed to record {} event: {}", GENERATE_IMAGE_EVENT, e);
    }

    Ok(Json(GenerateImageResponse { urls }))
}
