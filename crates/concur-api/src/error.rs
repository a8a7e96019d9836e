//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! A stale-version save is not an error and never passes through here; see
//! [`crate::records::update`].

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use concur_core::store::StoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  /// Malformed input, reported with the offending field.
  #[error("invalid {field}: {message}")]
  Validation {
    field:   String,
    message: String,
  },

  #[error("missing or invalid user identity")]
  Unauthorized,

  /// The store is busy or unreachable; retrying the whole request may work.
  #[error("store unavailable: {0}")]
  Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Classify a backend error as transient or not.
  pub fn store<E: StoreError>(e: E) -> Self {
    if e.is_transient() {
      Self::Unavailable(Box::new(e))
    } else {
      Self::Store(Box::new(e))
    }
  }
}

impl From<concur_core::Error> for ApiError {
  fn from(e: concur_core::Error) -> Self {
    match e {
      concur_core::Error::Validation { field, message } => Self::Validation { field, message },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::NotFound(m) => {
        (StatusCode::NOT_FOUND, Json(json!({ "error": m }))).into_response()
      }
      ApiError::Validation { field, message } => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "field": field })),
      )
        .into_response(),
      ApiError::Unauthorized => (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "missing or invalid user identity" })),
      )
        .into_response(),
      ApiError::Unavailable(e) => {
        tracing::warn!(error = %e, "transient store failure");
        (
          StatusCode::SERVICE_UNAVAILABLE,
          Json(json!({ "error": "storage busy, retry the request" })),
        )
          .into_response()
      }
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
          .into_response()
      }
    }
  }
}
