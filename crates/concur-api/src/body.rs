//! JSON body extractor.
//!
//! Like [`axum::Json`], but every rejection becomes an
//! [`ApiError::Validation`] so clients always get the `{error, field}` shape.
//! The content type is not checked. Wrapping it in `Option` accepts an empty
//! body as `None`, for endpoints whose payload is optional.

use std::collections::BTreeMap;

use axum::{
  body::Bytes,
  extract::{FromRequest, OptionalFromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

/// A JSON request body deserialised into `T`.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

/// Reported as the field when an error cannot be pinned to one key.
pub const BODY_FIELD: &str = "body";

async fn read_bytes<S>(req: Request, state: &S) -> Result<Bytes, ApiError>
where
  S: Send + Sync,
{
  <Bytes as FromRequest<S>>::from_request(req, state)
    .await
    .map_err(|rejection| ApiError::Validation {
      field:   BODY_FIELD.to_owned(),
      message: rejection.body_text(),
    })
}

fn is_blank(bytes: &[u8]) -> bool { bytes.iter().all(u8::is_ascii_whitespace) }

/// Deserialise `bytes`, naming the offending key when serde reports one.
pub fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
  serde_json::from_slice(bytes).map_err(|e| {
    let message = e.to_string();
    ApiError::Validation { field: quoted_field(&message).unwrap_or(BODY_FIELD).to_owned(), message }
  })
}

/// The backquoted name in serde's "missing field `x`" and
/// "unknown field `x`" messages.
fn quoted_field(message: &str) -> Option<&str> {
  let rest = &message[message.find("field `")? + "field `".len()..];
  rest.split('`').next().filter(|name| !name.is_empty())
}

/// Fail with the first key a flattened catch-all picked up.
pub fn reject_unknown(extra: &BTreeMap<String, Value>) -> Result<(), ApiError> {
  match extra.keys().next() {
    Some(key) => Err(ApiError::Validation {
      field:   key.clone(),
      message: format!("unknown field `{key}`"),
    }),
    None => Ok(()),
  }
}

impl<S, T> FromRequest<S> for JsonBody<T>
where
  S: Send + Sync,
  T: DeserializeOwned,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
    let bytes = read_bytes(req, state).await?;
    if is_blank(&bytes) {
      return Err(ApiError::Validation {
        field:   BODY_FIELD.to_owned(),
        message: "request body is required".to_owned(),
      });
    }
    parse(&bytes).map(JsonBody)
  }
}

impl<S, T> OptionalFromRequest<S> for JsonBody<T>
where
  S: Send + Sync,
  T: DeserializeOwned,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
    let bytes = read_bytes(req, state).await?;
    if is_blank(&bytes) {
      return Ok(None);
    }
    parse(&bytes).map(|body| Some(JsonBody(body)))
  }
}
