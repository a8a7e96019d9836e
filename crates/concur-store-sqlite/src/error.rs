//! Error type for `concur-store-sqlite`.

use concur_core::{record::RecordId, store::StoreError};
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] concur_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A row written in this call could not be read back.
  #[error("record not found: {0}")]
  RecordNotFound(RecordId),
}

impl StoreError for Error {
  fn is_transient(&self) -> bool {
    match self {
      Self::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) => matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      ),
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
