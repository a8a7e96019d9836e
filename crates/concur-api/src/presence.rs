//! Handlers for `/records/{id}/presence` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/records/{id}/presence` | Other users present now |
//! | `POST` | `/records/{id}/presence/ping` | Optional body: `{"session_token":"…"}` |
//! | `POST` | `/records/{id}/presence/leave` | Body as for ping; closes by token or fallback |
//! | `POST` | `/records/{id}/presence/sessions` | Opens a session, returns its token |
//! | `GET`  | `/records/{id}/presence/sessions` | Recent sessions, newest first |
//!
//! Presence is an enhancement. When its storage is unavailable these
//! endpoints still succeed with empty results.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use concur_core::{
  presence::{PresenceSession, PresentUser, SessionToken},
  record::RecordId,
  store::{PresenceStore, RecordStore},
};
use serde::{Deserialize, Serialize};

use crate::{ApiState, actor::CurrentActor, body::JsonBody, error::ApiError};

async fn require_record<S>(state: &ApiState<S>, id: RecordId) -> Result<(), ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  if state.store.record_exists(id).await.map_err(ApiError::store)? {
    Ok(())
  } else {
    Err(ApiError::NotFound(format!("record {id} not found")))
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenBody {
  #[serde(default)]
  pub session_token: Option<String>,
}

impl TokenBody {
  fn token(&self) -> Option<SessionToken> {
    self.session_token.as_deref().and_then(SessionToken::parse)
  }
}

#[derive(Debug, Serialize)]
pub struct PresentBody {
  pub users: Vec<PresentUser>,
}

// ─── Heartbeats ───────────────────────────────────────────────────────────────

/// `GET /records/{id}/presence`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  Path(id): Path<i64>,
) -> Result<Json<PresentBody>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  require_record(&state, id).await?;
  let users = state
    .store
    .list_present(id, Some(actor.user_id))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(PresentBody { users }))
}

/// `POST /records/{id}/presence/ping`
///
/// Records a heartbeat, refreshes the caller's session when a token is given,
/// and returns everyone else currently present.
pub async fn ping<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  Path(id): Path<i64>,
  body: Option<JsonBody<TokenBody>>,
) -> Result<Json<PresentBody>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  require_record(&state, id).await?;
  let body = body.map(|JsonBody(body)| body).unwrap_or_default();

  let user = actor.user_id;
  state.store.ping(id, actor).await.map_err(ApiError::store)?;
  if let Some(token) = body.token() {
    state
      .store
      .touch_session(token, id, user)
      .await
      .map_err(ApiError::store)?;
  }

  let users = state
    .store
    .list_present(id, Some(user))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(PresentBody { users }))
}

#[derive(Debug, Serialize)]
pub struct LeaveBody {
  pub ok:              bool,
  pub closed_sessions: usize,
}

/// `POST /records/{id}/presence/leave`
pub async fn leave<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  Path(id): Path<i64>,
  body: Option<JsonBody<TokenBody>>,
) -> Result<Json<LeaveBody>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  require_record(&state, id).await?;
  let body = body.map(|JsonBody(body)| body).unwrap_or_default();

  state
    .store
    .leave(id, actor.user_id)
    .await
    .map_err(ApiError::store)?;
  let closed_sessions = state
    .store
    .close_session(id, actor.user_id, body.token())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(LeaveBody { ok: true, closed_sessions }))
}

// ─── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OpenedBody {
  /// Empty when sessions are unavailable.
  pub session_token: String,
}

/// `POST /records/{id}/presence/sessions`
pub async fn open_session<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  require_record(&state, id).await?;

  let token = state
    .store
    .open_session(id, actor)
    .await
    .map_err(ApiError::store)?;
  let response = match token {
    Some(token) => (StatusCode::CREATED, Json(OpenedBody { session_token: token.to_string() })),
    None => (StatusCode::OK, Json(OpenedBody { session_token: String::new() })),
  };
  Ok(response)
}

#[derive(Debug, Serialize)]
pub struct SessionsBody {
  pub sessions: Vec<PresenceSession>,
}

/// `GET /records/{id}/presence/sessions`
pub async fn list_sessions<S>(
  State(state): State<ApiState<S>>,
  _actor: CurrentActor,
  Path(id): Path<i64>,
) -> Result<Json<SessionsBody>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  require_record(&state, id).await?;
  let sessions = state.store.list_sessions(id).await.map_err(ApiError::store)?;
  Ok(Json(SessionsBody { sessions }))
}
