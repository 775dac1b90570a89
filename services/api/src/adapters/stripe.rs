//! services/api/src/adapters/stripe.rs
//!
//! Stripe integration: hosted checkout sessions over the REST API and
//! verification of the `Stripe-Signature` webhook header.

use async_trait::async_trait;
use bookworm_core::ports::{BillingService, CheckoutRequest, CheckoutSession, PortError, PortResult};
use bookworm_core::session::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Maximum age, in seconds, of a signed webhook delivery.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

//=========================================================================================
// Webhook Signatures
//=========================================================================================

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Webhook secret is not configured")]
    MissingSecret,
    #[error("Malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("Signature timestamp is outside the tolerance window")]
    StaleTimestamp,
    #[error("No signature matches the payload")]
    Mismatch,
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `t=<unix>,v1=<hex>[,v1=...]` against the raw body.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let expected = compute_signature(secret, timestamp, payload)?;
    if candidates.iter().any(|candidate| constant_time_eq(candidate, &expected)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Builds a header value the way Stripe does. Used by local tooling and tests.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    match compute_signature(secret, timestamp, payload) {
        Ok(signature) => format!("t={},v1={}", timestamp, signature),
        Err(_) => format!("t={}", timestamp),
    }
}

//=========================================================================================
// Checkout Sessions
//=========================================================================================

#[derive(Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

/// Maps a non-2xx Stripe reply to an upstream error, keeping Stripe's error
/// type and message when the body carries them.
fn stripe_error(status: reqwest::StatusCode, body: &str) -> PortError {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => PortError::upstream(
            parsed.error.kind.unwrap_or_else(|| "StripeError".to_string()),
            parsed.error.message.unwrap_or_else(|| status.to_string()),
        ),
        Err(_) => PortError::upstream("StripeError", format!("HTTP {}", status)),
    }
}

fn parse_checkout_session(body: &str) -> PortResult<CheckoutSession> {
    let session: CheckoutSessionResponse = serde_json::from_str(body)
        .map_err(|e| PortError::upstream("DeserializeError", e.to_string()))?;
    let url = session
        .url
        .ok_or_else(|| PortError::upstream("StripeError", "Checkout session has no URL"))?;
    Ok(CheckoutSession { id: session.id, url })
}

pub struct StripeAdapter {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeAdapter {
    pub fn new(http: reqwest::Client, secret_key: String) -> Self {
        Self::with_api_base(http, secret_key, DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(http: reqwest::Client, secret_key: String, api_base: String) -> Self {
        Self {
            http,
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BillingService for StripeAdapter {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> PortResult<CheckoutSession> {
        if self.secret_key.is_empty() {
            return Err(PortError::upstream(
                "ConfigurationError",
                "Stripe is not configured on this server.",
            ));
        }

        let user_id = request.user_id.to_string();
        let form = [
            ("mode", "subscription"),
            ("line_items[0][price]", request.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("client_reference_id", user_id.as_str()),
            ("customer_email", request.email.as_str()),
            ("metadata[user_id]", user_id.as_str()),
            ("metadata[plan]", request.plan.as_str()),
            ("metadata[price_id]", request.price_id.as_str()),
            ("subscription_data[metadata][user_id]", user_id.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PortError::upstream("HttpError", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PortError::upstream("HttpError", e.to_string()))?;
        if !status.is_success() {
            let err = stripe_error(status, &body);
            error!("Checkout session creation failed: {}", err);
            return Err(err);
        }

        let session = parse_checkout_session(&body)?;
        info!("Created checkout session {} for user {}", session.id, request.user_id);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;

    #[test]
    fn signed_payload_verifies_within_tolerance() {
        let now = 1_700_000_000;
        let header = sign_webhook_payload(BODY, SECRET, now - 60);
        assert_eq!(verify_webhook_signature(BODY, &header, SECRET, now), Ok(()));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let now = 1_700_000_000;
        let good = sign_webhook_payload(BODY, SECRET, now);
        let header = format!("t={now},v1=deadbeef,{}", good.split_once(',').unwrap().1);
        assert_eq!(verify_webhook_signature(BODY, &header, SECRET, now), Ok(()));
    }

    #[test]
    fn tampering_and_staleness_are_rejected() {
        let now = 1_700_000_000;
        let header = sign_webhook_payload(BODY, SECRET, now);
        assert_eq!(
            verify_webhook_signature(b"{}", &header, SECRET, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature(BODY, &header, "whsec_other", now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature(BODY, &header, SECRET, now + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn malformed_headers_and_missing_secret_fail() {
        assert_eq!(
            verify_webhook_signature(BODY, "garbage", SECRET, 0),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature(BODY, "t=0", SECRET, 0),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature(BODY, "t=0,v1=00", "", 0),
            Err(SignatureError::MissingSecret)
        );
    }

    #[test]
    fn stripe_error_bodies_keep_type_and_message() {
        let body = r#"{"error":{"type":"invalid_request_error","message":"No such price: 'price_x'"}}"#;
        match stripe_error(reqwest::StatusCode::BAD_REQUEST, body) {
            PortError::Upstream { kind, message } => {
                assert_eq!(kind, "invalid_request_error");
                assert_eq!(message, "No such price: 'price_x'");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = stripe_error(reqwest::StatusCode::BAD_GATEWAY, "<html>upstream down</html>");
        assert_eq!(err.kind(), "StripeError");
        assert_eq!(err.detail(), "HTTP 502 Bad Gateway");
    }

    #[test]
    fn checkout_session_needs_a_url() {
        let session =
            parse_checkout_session(r#"{"id":"cs_1","url":"https://checkout.stripe.com/c/cs_1"}"#)
                .unwrap();
        assert_eq!(session.id, "cs_1");
        assert_eq!(session.url, "https://checkout.stripe.com/c/cs_1");

        let err = parse_checkout_session(r#"{"id":"cs_2","url":null}"#).unwrap_err();
        assert_eq!(err.detail(), "Checkout session has no URL");
        assert_eq!(
            parse_checkout_session("not json").unwrap_err().kind(),
            "DeserializeError"
        );
    }

    #[tokio::test]
    async fn unconfigured_adapter_fails_without_calling_stripe() {
        let adapter = StripeAdapter::with_api_base(
            reqwest::Client::new(),
            String::new(),
            "http://127.0.0.1:9".to_string(),
        );
        let err = adapter
            .create_checkout_session(&CheckoutRequest {
                user_id: uuid::Uuid::new_v4(),
                email: "buyer@example.com".to_string(),
                plan: bookworm_core::domain::Plan::Pro,
                price_id: "price_pro".to_string(),
                success_url: "http://localhost/ok".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
