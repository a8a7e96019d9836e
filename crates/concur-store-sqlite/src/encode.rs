//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision (`2026-03-01T09:30:00.123456Z`), so string comparison in SQL
//! agrees with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use concur_core::{
  actor::UserId,
  audit::AuditEntry,
  presence::{PresenceSession, PresentUser},
  record::{Attributes, Record, RecordFields, RecordId, RecordView},
  version::VersionToken,
};
use rusqlite::types::Type;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// [`decode_dt`] for use inside a connection closure, where errors must be
/// `rusqlite` errors.
pub fn decode_dt_sql(s: &str) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Display names are stored as `''` when unknown.
fn display_name(raw: Option<String>) -> Option<String> {
  raw.filter(|name| !name.is_empty())
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from a `records` row plus its derived history sequence.
pub struct RawRecord {
  pub record_id:   i64,
  pub title:       String,
  pub body:        String,
  pub status:      Option<String>,
  pub priority:    Option<String>,
  pub severity:    Option<String>,
  pub created_by:  i64,
  pub created_at:  String,
  pub updated_at:  String,
  pub history_seq: i64,
}

/// Column list matching [`RawRecord::from_row`].
pub const RECORD_COLUMNS: &str = "r.record_id, r.title, r.body, r.status, r.priority, \
   r.severity, r.created_by, r.created_at, r.updated_at, \
   COALESCE((SELECT MAX(a.seq) FROM audit_entries a WHERE a.record_id = r.record_id), 0)";

impl RawRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:   row.get(0)?,
      title:       row.get(1)?,
      body:        row.get(2)?,
      status:      row.get(3)?,
      priority:    row.get(4)?,
      severity:    row.get(5)?,
      created_by:  row.get(6)?,
      created_at:  row.get(7)?,
      updated_at:  row.get(8)?,
      history_seq: row.get(9)?,
    })
  }

  pub fn fields(&self) -> RecordFields {
    RecordFields {
      title:    self.title.clone(),
      body:     self.body.clone(),
      status:   self.status.clone(),
      priority: self.priority.clone(),
      severity: self.severity.clone(),
    }
  }

  pub fn into_view(self, attributes: Attributes) -> Result<RecordView> {
    let fields = self.fields();
    let updated_at = decode_dt(&self.updated_at)?;
    Ok(RecordView {
      record: Record {
        record_id: RecordId(self.record_id),
        fields,
        created_by: UserId(self.created_by),
        created_at: decode_dt(&self.created_at)?,
        updated_at,
      },
      attributes,
      version: VersionToken { updated_at, history_seq: self.history_seq },
    })
  }
}

/// Group `(key, value)` rows, already ordered, into an attribute map.
pub fn collect_attributes(rows: Vec<(String, String)>) -> Attributes {
  let mut attributes = Attributes::new();
  for (key, value) in rows {
    attributes.entry(key).or_default().push(value);
  }
  attributes
}

pub struct RawAuditEntry {
  pub record_id:   i64,
  pub seq:         i64,
  pub actor_id:    i64,
  pub actor_name:  Option<String>,
  pub field:       String,
  pub old_value:   String,
  pub new_value:   String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      record_id:   RecordId(self.record_id),
      seq:         self.seq,
      actor_id:    UserId(self.actor_id),
      actor_name:  display_name(self.actor_name),
      field:       self.field,
      old_value:   self.old_value,
      new_value:   self.new_value,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawPresentUser {
  pub user_id:      i64,
  pub display_name: Option<String>,
  pub last_seen:    String,
}

impl RawPresentUser {
  pub fn into_present(self) -> Result<PresentUser> {
    Ok(PresentUser {
      user_id:      UserId(self.user_id),
      display_name: display_name(self.display_name),
      last_seen:    decode_dt(&self.last_seen)?,
    })
  }
}

pub struct RawSession {
  pub record_id:        i64,
  pub user_id:          i64,
  pub display_name:     Option<String>,
  pub opened_at:        String,
  pub last_seen:        String,
  pub closed_at:        Option<String>,
  pub duration_seconds: Option<i64>,
}

impl RawSession {
  pub fn into_session(self) -> Result<PresenceSession> {
    Ok(PresenceSession {
      record_id:        RecordId(self.record_id),
      user_id:          UserId(self.user_id),
      display_name:     display_name(self.display_name),
      opened_at:        decode_dt(&self.opened_at)?,
      last_seen:        decode_dt(&self.last_seen)?,
      closed_at:        self.closed_at.as_deref().map(decode_dt).transpose()?,
      duration_seconds: self.duration_seconds,
    })
  }
}
