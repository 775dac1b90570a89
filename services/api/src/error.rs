//! services/api/src/error.rs
//!
//! Defines the startup error type for the API service and the error type
//! every HTTP handler returns.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bookworm_core::credentials::CredentialError;
use bookworm_core::gateway::GatewayError;
use bookworm_core::policy::AccessDenied;
use bookworm_core::ports::PortError;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

//=========================================================================================
// HTTP Errors
//=========================================================================================

/// An error answered to an HTTP caller as `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Not authenticated.")]
    AuthenticationRequired,
    #[error("Owner access required.")]
    OwnerRequired,
    #[error("{0}")]
    SubscriptionRequired(String),
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("{0}")]
    Validation(String),
    #[error("Invalid webhook signature.")]
    WebhookSignatureInvalid,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Internal server error.")]
    Internal,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::AuthenticationRequired | HttpError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            HttpError::OwnerRequired => StatusCode::FORBIDDEN,
            HttpError::SubscriptionRequired(_) => StatusCode::PAYMENT_REQUIRED,
            HttpError::Validation(_) | HttpError::WebhookSignatureInvalid => {
                StatusCode::BAD_REQUEST
            }
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Upstream(_) | HttpError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<PortError> for HttpError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(message) => HttpError::NotFound(message),
            PortError::Upstream { kind, message } => {
                error!("Upstream provider error: {}: {}", kind, message);
                HttpError::Upstream(format!("{}: {}", kind, message))
            }
            other => {
                error!("Storage error: {}", other);
                HttpError::Internal
            }
        }
    }
}

impl From<CredentialError> for HttpError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Port(port) => port.into(),
            validation => HttpError::Validation(validation.to_string()),
        }
    }
}

impl From<AccessDenied> for HttpError {
    fn from(err: AccessDenied) -> Self {
        HttpError::SubscriptionRequired(err.to_string())
    }
}

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        HttpError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(HttpError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(HttpError::OwnerRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            HttpError::SubscriptionRequired("pay".into()).status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            HttpError::from(CredentialError::DuplicateEmail).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::from(PortError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HttpError::from(PortError::Unexpected("db".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn provider_errors_keep_their_class_in_the_detail() {
        let err = HttpError::from(PortError::upstream("card_error", "Your card was declined."));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "card_error: Your card was declined.");
    }

    #[test]
    fn missing_required_key_is_a_configuration_error() {
        let err = ApiError::from(ConfigError::MissingVar("OPENAI_API_KEY".into()));
        assert!(matches!(err, ApiError::Config(ConfigError::MissingVar(_))));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
