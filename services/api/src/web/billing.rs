//! services/api/src/web/billing.rs
//!
//! Checkout session creation and the billing-provider webhook receiver.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Extension, Json,
};
use bookworm_core::billing::{SyncOutcome, WebhookEvent};
use bookworm_core::domain::{Identity, Plan};
use bookworm_core::ports::{AnalyticsStore, CheckoutRequest};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::adapters::stripe::verify_webhook_signature;
use crate::error::HttpError;
use crate::web::extract::ApiJson;
use crate::web::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const CHECKOUT_EVENT: &str = "checkout_started";
pub const WEBHOOK_EVENT: &str = "stripe_webhook";

#[derive(Deserialize, ToSchema)]
pub struct CheckoutRequestBody {
    /// `basic`, `pro` or `patron`.
    pub plan: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub id: String,
    pub url: String,
}

/// POST /stripe/create-checkout-session - Start a hosted checkout for a plan
#[utoipa::path(
    post,
    path = "/stripe/create-checkout-session",
    request_body = CheckoutRequestBody,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Unknown plan or plan without a configured price"),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Billing provider failure")
    )
)]
pub async fn create_checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CheckoutRequestBody>,
) -> Result<Json<CheckoutResponse>, HttpError> {
    let plan = Plan::parse(&req.plan)
        .filter(|p| matches!(p, Plan::Basic | Plan::Pro | Plan::Patron))
        .ok_or_else(|| {
            HttpError::Validation(format!(
                "Unknown plan '{}'. Choose basic, pro or patron.",
                req.plan
            ))
        })?;
    let price_id = state
        .subscriptions
        .prices()
        .price_for_plan(plan)
        .ok_or_else(|| {
            HttpError::Validation(format!("The {} plan is not available right now.", plan))
        })?
        .to_string();

    let session = state
        .billing
        .create_checkout_session(&CheckoutRequest {
            user_id: identity.user_id,
            email: identity.email.clone(),
            plan,
            price_id,
            success_url: state.config.checkout_success_url.clone(),
            cancel_url: state.config.checkout_cancel_url.clone(),
        })
        .await?;

    if let Err(e) = state
        .db
        .record_event(
            Some(identity.user_id),
            CHECKOUT_EVENT,
            &json!({ "plan": plan.as_str() }),
        )
        .await
    {
        warn!("Failed to record {} event: {}", CHECKOUT_EVENT, e);
    }

    Ok(Json(CheckoutResponse {
        id: session.id,
        url: session.url,
    }))
}

/// POST /stripe/webhook - Receive subscription lifecycle events
///
/// The raw body is verified against the `Stripe-Signature` header before
/// anything is parsed. Once verified, the event is always acknowledged.
#[utoipa::path(
    post,
    path = "/stripe/webhook",
    request_body(content_type = "application/json", description = "Raw provider event payload."),
    params(
        ("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")
    ),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature")
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, HttpError> {
    let secret = state.config.stripe_webhook_secret.as_deref().unwrap_or("");
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Err(e) = verify_webhook_signature(&body, signature, secret, Utc::now().timestamp()) {
        warn!("Rejected webhook delivery: {}", e);
        return Err(HttpError::WebhookSignatureInvalid);
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            error!("Verified webhook could not be parsed: {}", e);
            return Ok(Json(json!({ "received": true })));
        }
    };

    let outcome = match state.subscriptions.handle(&event).await {
        Ok(outcome) => {
            info!("Webhook {} ({}) handled: {:?}", event.id, event.event_type, outcome);
            Some(outcome)
        }
        Err(e) => {
            error!("Failed to apply webhook {} ({}): {}", event.id, event.event_type, e);
            None
        }
    };

    if let Some(SyncOutcome::Applied { user_id, plan, status }) = outcome {
        let metadata = json!({
            "event_id": event.id,
            "event_type": event.event_type,
            "plan": plan.as_str(),
            "status": status.as_str(),
        });
        if let Err(e) = state.db.record_event(Some(user_id), WEBHOOK_EVENT, &metadata).await {
            warn!("Failed to record {} event: {}", WEBHOOK_EVENT, e);
        }
    }

    Ok(Json(json!({ "received": true })))
}
