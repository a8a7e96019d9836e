//! [`SqliteStore`]: the SQLite implementation of [`RecordStore`].

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, Transaction, TransactionBehavior};
use serde_json::Value;

use concur_core::{
  actor::Actor,
  audit::{AuditEntry, FieldChange, Snapshot, diff_snapshots},
  canonical::flatten_values,
  clock::{Clock, SystemClock, advance_past, now_micros},
  presence::{Feature, PresencePolicy},
  record::{NewRecord, RecordFields, RecordId, RecordUpdate, RecordView},
  store::RecordStore,
  version::{AppliedUpdate, ExpectedVersion, Guarded, UpdateOutcome, VersionToken, check_version},
};

use crate::{
  Error, Result,
  bootstrap::{FeatureAvailability, ensure_feature},
  encode::{
    RECORD_COLUMNS, RawAuditEntry, RawRecord, collect_attributes, decode_dt_sql, encode_dt,
  },
  schema::{SCHEMA, feature_schema},
};

/// How long a statement waits on another connection's write lock before
/// reporting `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Concur store backed by a single SQLite file.
///
/// Cloning is cheap: the connection, clock and feature flags are shared.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn:     tokio_rusqlite::Connection,
  pub(crate) clock:    Arc<dyn Clock>,
  pub(crate) policy:   PresencePolicy,
  pub(crate) features: Arc<FeatureAvailability>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;

    Ok(Self {
      conn,
      clock: Arc::new(SystemClock),
      policy: PresencePolicy::default(),
      features: Arc::new(FeatureAvailability::default()),
    })
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn with_policy(mut self, policy: PresencePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> &PresencePolicy { &self.policy }

  pub(crate) fn now(&self) -> DateTime<Utc> { now_micros(self.clock.as_ref()) }

  /// Make sure the table backing `feature` exists and has every expected
  /// column and index.
  ///
  /// Safe to call concurrently from any number of handlers and processes.
  /// Returns `false`, having logged why, when the feature cannot be used; a
  /// successful result is cached for the life of the store.
  pub async fn ensure_feature(&self, feature: Feature) -> Result<bool> {
    if self.features.is_ready(feature) {
      return Ok(true);
    }

    let schema = feature_schema(feature);
    let ready = self
      .conn
      .call(move |conn| Ok(ensure_feature(conn, schema)))
      .await?;

    if ready {
      self.features.mark_ready(feature);
    } else {
      tracing::warn!(feature = %feature, "feature unavailable; operations degrade to no-ops");
    }
    Ok(ready)
  }

  // ── Conflict guard ────────────────────────────────────────────────────────

  /// Run `mutation` against record `id` only if its current version matches
  /// `expected`.
  ///
  /// The version read, the comparison and the mutation share one immediate
  /// transaction, so no other writer can slip in between the check and the
  /// write. Returns `None` when the record does not exist. A conflict rolls
  /// back without touching any row.
  pub async fn check_and_apply<T, F>(
    &self,
    id: RecordId,
    expected: ExpectedVersion,
    mutation: F,
  ) -> Result<Option<Guarded<T>>>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>, &VersionToken) -> rusqlite::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(current) = load_version(&tx, id)? else {
          return Ok(None);
        };
        if let Err(conflict) = check_version(&current, &expected) {
          return Ok(Some(Guarded::Conflict(conflict)));
        }

        let applied = mutation(&tx, &current)?;
        tx.commit()?;
        Ok(Some(Guarded::Applied(applied)))
      })
      .await?;
    Ok(outcome)
  }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// Synchronous helpers shared by the connection closures. They take a plain
// `&Connection`, which a `&Transaction` derefs to.

/// The authoritative version of `id`, or `None` if it does not exist.
fn load_version(conn: &Connection, id: RecordId) -> rusqlite::Result<Option<VersionToken>> {
  let raw: Option<(String, i64)> = conn
    .query_row(
      "SELECT updated_at,
              COALESCE((SELECT MAX(seq) FROM audit_entries WHERE record_id = ?1), 0)
       FROM records WHERE record_id = ?1",
      rusqlite::params![id.0],
      |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?;

  raw
    .map(|(updated_at, history_seq)| {
      Ok(VersionToken { updated_at: decode_dt_sql(&updated_at)?, history_seq })
    })
    .transpose()
}

fn load_raw_record(conn: &Connection, id: RecordId) -> rusqlite::Result<Option<RawRecord>> {
  conn
    .query_row(
      &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.record_id = ?1"),
      rusqlite::params![id.0],
      RawRecord::from_row,
    )
    .optional()
}

fn load_attribute_rows(
  conn: &Connection,
  id: RecordId,
) -> rusqlite::Result<Vec<(String, String)>> {
  let mut stmt = conn.prepare(
    "SELECT attr_key, attr_value FROM record_attributes
     WHERE record_id = ?1
     ORDER BY attr_key, attribute_id",
  )?;
  let rows = stmt
    .query_map(rusqlite::params![id.0], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Replace the whole value set of one attribute key.
fn replace_attribute(
  conn: &Connection,
  id: RecordId,
  key: &str,
  raw: &Value,
) -> rusqlite::Result<()> {
  conn.execute(
    "DELETE FROM record_attributes WHERE record_id = ?1 AND attr_key = ?2",
    rusqlite::params![id.0, key],
  )?;
  let mut insert = conn.prepare_cached(
    "INSERT INTO record_attributes (record_id, attr_key, attr_value) VALUES (?1, ?2, ?3)",
  )?;
  for value in flatten_values(key, raw) {
    insert.execute(rusqlite::params![id.0, key, value])?;
  }
  Ok(())
}

fn write_fields(
  conn: &Connection,
  id: RecordId,
  fields: &RecordFields,
  updated_at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "UPDATE records
     SET title = ?2, body = ?3, status = ?4, priority = ?5, severity = ?6, updated_at = ?7
     WHERE record_id = ?1",
    rusqlite::params![
      id.0,
      fields.title.trim(),
      fields.body,
      fields.status,
      fields.priority,
      fields.severity,
      updated_at,
    ],
  )?;
  Ok(())
}

/// Record the actor's current display name. A blank name never overwrites a
/// known one.
pub(crate) fn upsert_user(conn: &Connection, actor: &Actor) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO users (user_id, display_name) VALUES (?1, ?2)
     ON CONFLICT (user_id) DO UPDATE SET display_name = excluded.display_name
     WHERE excluded.display_name <> ''",
    rusqlite::params![actor.user_id.0, actor.display_name.trim()],
  )?;
  Ok(())
}

/// Append one audit row with the next sequence number for the record.
fn append_audit(
  conn: &Connection,
  id: RecordId,
  actor: &Actor,
  change: &FieldChange,
  recorded_at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO audit_entries
       (record_id, seq, actor_id, field_name, old_value, new_value, recorded_at)
     SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5, ?6
     FROM audit_entries WHERE record_id = ?1",
    rusqlite::params![
      id.0,
      actor.user_id.0,
      change.field,
      change.old_value,
      change.new_value,
      recorded_at,
    ],
  )?;
  Ok(())
}

/// Persist the changed fields of one save, one row each.
///
/// A failing row is logged and skipped; it never aborts the save or the
/// remaining rows. Returns the changes actually written.
fn record_changes(
  conn: &Connection,
  id: RecordId,
  actor: &Actor,
  changes: Vec<FieldChange>,
  recorded_at: &str,
) -> Vec<FieldChange> {
  let mut written = Vec::with_capacity(changes.len());
  for change in changes {
    match append_audit(conn, id, actor, &change, recorded_at) {
      Ok(()) => written.push(change),
      Err(error) => tracing::warn!(
        record_id = %id,
        field = %change.field,
        %error,
        "audit entry not written"
      ),
    }
  }
  written
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn create_record(&self, actor: Actor, input: NewRecord) -> Result<RecordView> {
    input.validate()?;
    let now = encode_dt(self.now());

    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        upsert_user(&tx, &actor)?;
        tx.execute(
          "INSERT INTO records
             (title, body, status, priority, severity, created_by, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
          rusqlite::params![
            input.fields.title.trim(),
            input.fields.body,
            input.fields.status,
            input.fields.priority,
            input.fields.severity,
            actor.user_id.0,
            now,
          ],
        )?;
        let id = RecordId(tx.last_insert_rowid());
        for (key, raw) in &input.attributes {
          replace_attribute(&tx, id, key, raw)?;
        }
        tx.commit()?;
        Ok(id)
      })
      .await?;

    tracing::debug!(record_id = %id, "record created");
    self.get_record(id).await?.ok_or(Error::RecordNotFound(id))
  }

  async fn get_record(&self, id: RecordId) -> Result<Option<RecordView>> {
    let raw = self
      .conn
      .call(move |conn| {
        let Some(record) = load_raw_record(conn, id)? else {
          return Ok(None);
        };
        let attributes = load_attribute_rows(conn, id)?;
        Ok(Some((record, attributes)))
      })
      .await?;

    raw
      .map(|(record, attributes)| record.into_view(collect_attributes(attributes)))
      .transpose()
  }

  async fn record_exists(&self, id: RecordId) -> Result<bool> {
    let exists: bool = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT EXISTS (SELECT 1 FROM records WHERE record_id = ?1)",
          rusqlite::params![id.0],
          |row| row.get(0),
        )?)
      })
      .await?;
    Ok(exists)
  }

  async fn update_record(
    &self,
    id: RecordId,
    actor: Actor,
    update: RecordUpdate,
  ) -> Result<Option<UpdateOutcome>> {
    update.validate()?;
    let now = self.now();
    let RecordUpdate { fields, attributes, expected } = update;

    self
      .check_and_apply(id, expected, move |tx, current| {
        let Some(before) = load_raw_record(tx, id)? else {
          return Err(rusqlite::Error::QueryReturnedNoRows);
        };
        let stored = collect_attributes(load_attribute_rows(tx, id)?);
        let old = Snapshot::from_stored(before.fields(), &stored);
        let new = old.with_overrides(fields.clone(), &attributes);
        let changes = diff_snapshots(&old, &new);

        let updated_at = advance_past(now, current.updated_at);
        write_fields(tx, id, &fields, &encode_dt(updated_at))?;
        for (key, raw) in &attributes {
          replace_attribute(tx, id, key, raw)?;
        }
        upsert_user(tx, &actor)?;

        let changes = record_changes(tx, id, &actor, changes, &encode_dt(now));
        let version = load_version(tx, id)?
          .unwrap_or(VersionToken { updated_at, history_seq: current.history_seq });

        Ok(AppliedUpdate { version, changes })
      })
      .await
  }

  async fn history(&self, id: RecordId) -> Result<Vec<AuditEntry>> {
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT a.record_id, a.seq, a.actor_id, u.display_name,
                  a.field_name, a.old_value, a.new_value, a.recorded_at
           FROM audit_entries a
           LEFT JOIN users u ON u.user_id = a.actor_id
           WHERE a.record_id = ?1
           ORDER BY a.seq DESC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id.0], |row| {
            Ok(RawAuditEntry {
              record_id:   row.get(0)?,
              seq:         row.get(1)?,
              actor_id:    row.get(2)?,
              actor_name:  row.get(3)?,
              field:       row.get(4)?,
              old_value:   row.get(5)?,
              new_value:   row.get(6)?,
              recorded_at: row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }
}
