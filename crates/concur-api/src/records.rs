//! Handlers for `/records` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/records` | 201 with the created record |
//! | `GET`  | `/records/{id}` | Record, attributes and version tokens |
//! | `PUT`  | `/records/{id}` | Guarded save; 409 with current tokens when stale |
//! | `GET`  | `/records/{id}/history` | Audit trail, newest first |

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use concur_core::{
  activity::{ActivityEvent, notify},
  audit::AuditEntry,
  record::{NewRecord, RecordFields, RecordId, RecordUpdate, RecordView},
  store::{PresenceStore, RecordStore},
  version::{ExpectedVersion, Guarded, VersionToken},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  ApiState,
  actor::CurrentActor,
  body::{JsonBody, reject_unknown},
  error::ApiError,
};

fn not_found(id: RecordId) -> ApiError { ApiError::NotFound(format!("record {id} not found")) }

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  #[serde(flatten)]
  pub fields:     RecordFields,
  #[serde(default)]
  pub attributes: BTreeMap<String, Value>,
  /// Keys matching nothing above; any entry rejects the request.
  #[serde(flatten)]
  pub extra:      BTreeMap<String, Value>,
}

/// `POST /records`
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  JsonBody(body): JsonBody<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  reject_unknown(&body.extra)?;
  let input = NewRecord { fields: body.fields, attributes: body.attributes };
  input.validate()?;

  let actor_id = actor.user_id;
  let view = state
    .store
    .create_record(actor, input)
    .await
    .map_err(ApiError::store)?;

  notify(state.activity.as_ref(), &ActivityEvent::RecordCreated {
    record_id: view.record.record_id,
    actor_id,
  });
  Ok((StatusCode::CREATED, Json(view)))
}

// ─── Read ─────────────────────────────────────────────────────────────────────

/// `GET /records/{id}`
pub async fn get_one<S>(
  State(state): State<ApiState<S>>,
  _actor: CurrentActor,
  Path(id): Path<i64>,
) -> Result<Json<RecordView>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  let view = state
    .store
    .get_record(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| not_found(id))?;
  Ok(Json(view))
}

/// `GET /records/{id}/history`
pub async fn history<S>(
  State(state): State<ApiState<S>>,
  _actor: CurrentActor,
  Path(id): Path<i64>,
) -> Result<Json<Vec<AuditEntry>>, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  let id = RecordId(id);
  if !state.store.record_exists(id).await.map_err(ApiError::store)? {
    return Err(not_found(id));
  }
  let entries = state.store.history(id).await.map_err(ApiError::store)?;
  Ok(Json(entries))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// Body of a guarded save: the full set of core fields, the attribute keys
/// being changed, and the version tokens the editor loaded.
#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  #[serde(flatten)]
  pub fields:               RecordFields,
  #[serde(default)]
  pub attributes:           BTreeMap<String, Value>,
  /// RFC 3339 timestamp; parsed by the handler so errors name the field.
  #[serde(default)]
  pub expected_updated_at:  Option<String>,
  #[serde(default)]
  pub expected_history_seq: Option<i64>,
  #[serde(flatten)]
  pub extra:                BTreeMap<String, Value>,
}

fn parse_expected_updated_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
  raw
    .map(|s| {
      DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::Validation {
          field:   "expected_updated_at".to_owned(),
          message: format!("expected an RFC 3339 timestamp: {e}"),
        })
    })
    .transpose()
}

#[derive(Debug, Serialize)]
pub struct AppliedBody {
  pub applied:        bool,
  pub version:        VersionToken,
  pub changed_fields: Vec<String>,
}

/// Body of a 409 response. Carries the current tokens so the editor can
/// reload and resubmit without discarding its draft.
#[derive(Debug, Serialize)]
pub struct ConflictBody {
  pub error:               &'static str,
  pub conflict:            bool,
  pub current_updated_at:  DateTime<Utc>,
  pub current_history_seq: i64,
}

/// `PUT /records/{id}`
pub async fn update<S>(
  State(state): State<ApiState<S>>,
  CurrentActor(actor): CurrentActor,
  Path(id): Path<i64>,
  JsonBody(body): JsonBody<UpdateBody>,
) -> Result<Response, ApiError>
where
  S: RecordStore + PresenceStore + 'static,
{
  reject_unknown(&body.extra)?;
  let id = RecordId(id);
  let update = RecordUpdate {
    fields:     body.fields,
    attributes: body.attributes,
    expected:   ExpectedVersion {
      updated_at:  parse_expected_updated_at(body.expected_updated_at.as_deref())?,
      history_seq: body.expected_history_seq,
    },
  };
  update.validate()?;

  let actor_id = actor.user_id;
  let outcome = state
    .store
    .update_record(id, actor, update)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| not_found(id))?;

  let response = match outcome {
    Guarded::Applied(applied) => {
      notify(state.activity.as_ref(), &ActivityEvent::RecordUpdated {
        record_id: id,
        actor_id,
        version: applied.version,
        changed_fields: applied.changes.len(),
      });
      let body = AppliedBody {
        applied:        true,
        version:        applied.version,
        changed_fields: applied.changes.into_iter().map(|c| c.field).collect(),
      };
      (StatusCode::OK, Json(body)).into_response()
    }
    Guarded::Conflict(conflict) => {
      notify(state.activity.as_ref(), &ActivityEvent::UpdateConflict {
        record_id: id,
        actor_id,
        current: conflict.current,
      });
      let body = ConflictBody {
        error:               "record was changed by someone else; reload to see the latest version",
        conflict:            true,
        current_updated_at:  conflict.current.updated_at,
        current_history_seq: conflict.current.history_seq,
      };
      (StatusCode::CONFLICT, Json(body)).into_response()
    }
  };
  Ok(response)
}
