//! services/api/src/web/extract.rs
//!
//! Request extractors whose rejections render like every other API error.

use axum::extract::{rejection::JsonRejection, FromRequest};

use crate::error::HttpError;

/// `axum::Json` with malformed or incomplete bodies answered as
/// `400 {"detail": ...}` instead of axum's plain-text rejection.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(HttpError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::Validation(rejection.body_text())
    }
}
