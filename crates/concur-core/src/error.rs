//! Error types for `concur-core`.

use thiserror::Error;

/// Errors raised by domain validation.
///
/// A stale version is deliberately absent: it is an expected outcome of a
/// guarded update and is reported through [`crate::version::Guarded`].
#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input; the caller must correct `field` before retrying.
  #[error("invalid {field}: {message}")]
  Validation {
    field:   String,
    message: String,
  },
}

impl Error {
  pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Validation { field: field.into(), message: message.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
