//! Identity extractor.
//!
//! The upstream identity provider authenticates the caller and forwards the
//! result in two headers:
//!
//! - `X-User-Id`: positive integer, required.
//! - `X-User-Name`: display name, optional.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use concur_core::actor::Actor;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// The authenticated caller of the current request.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

/// Read the acting user from request headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
  let user_id = headers
    .get(USER_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.trim().parse::<i64>().ok())
    .filter(|id| *id > 0)
    .ok_or(ApiError::Unauthorized)?;

  let display_name = headers
    .get(USER_NAME_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .unwrap_or_default();

  Ok(Actor::new(user_id, display_name))
}

impl<S> FromRequestParts<S> for CurrentActor
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    actor_from_headers(&parts.headers).map(CurrentActor)
  }
}
