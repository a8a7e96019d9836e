//! SQL schema for the Concur SQLite store.
//!
//! [`SCHEMA`] holds the tables every deployment needs and is executed at
//! connection startup. The presence tables are optional features described by
//! [`FeatureSchema`] and prepared on demand by the bootstrapper.

use concur_core::presence::Feature;

/// Core DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Display identities as last reported by the identity provider.
CREATE TABLE IF NOT EXISTS users (
    user_id      INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS records (
    record_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    title      TEXT NOT NULL,
    body       TEXT NOT NULL DEFAULT '',
    status     TEXT,
    priority   TEXT,
    severity   TEXT,
    created_by INTEGER NOT NULL,
    created_at TEXT NOT NULL,   -- RFC 3339 UTC, microsecond precision
    updated_at TEXT NOT NULL    -- authoritative version timestamp
);

-- One row per value; a key's rows are always replaced as a whole set.
CREATE TABLE IF NOT EXISTS record_attributes (
    attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id    INTEGER NOT NULL REFERENCES records(record_id),
    attr_key     TEXT NOT NULL,
    attr_value   TEXT NOT NULL
);

-- Audit entries are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id   INTEGER NOT NULL REFERENCES records(record_id),
    seq         INTEGER NOT NULL,
    actor_id    INTEGER NOT NULL,
    field_name  TEXT NOT NULL,
    old_value   TEXT NOT NULL,
    new_value   TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE (record_id, seq)
);

CREATE INDEX IF NOT EXISTS record_attributes_key_idx ON record_attributes(record_id, attr_key);
";

/// Everything the bootstrapper needs to create or repair one feature table.
#[derive(Debug)]
pub struct FeatureSchema {
  pub table:   &'static str,
  /// `CREATE TABLE IF NOT EXISTS` statement for a fresh install.
  pub create:  &'static str,
  /// Expected columns with the declaration used when adding one to an
  /// older table. Declarations must be valid for `ALTER TABLE ADD COLUMN`.
  pub columns: &'static [(&'static str, &'static str)],
  /// `CREATE INDEX IF NOT EXISTS` statements.
  pub indexes: &'static [&'static str],
}

pub static HEARTBEATS: FeatureSchema = FeatureSchema {
  table:   "presence_heartbeats",
  create:  "CREATE TABLE IF NOT EXISTS presence_heartbeats (
              heartbeat_id INTEGER PRIMARY KEY AUTOINCREMENT,
              record_id    INTEGER NOT NULL,
              user_id      INTEGER NOT NULL,
              last_seen    TEXT NOT NULL
            )",
  columns: &[
    ("record_id", "INTEGER NOT NULL DEFAULT 0"),
    ("user_id", "INTEGER NOT NULL DEFAULT 0"),
    ("last_seen", "TEXT NOT NULL DEFAULT '1970-01-01T00:00:00.000000Z'"),
  ],
  indexes: &[
    "CREATE UNIQUE INDEX IF NOT EXISTS presence_heartbeats_record_user
       ON presence_heartbeats(record_id, user_id)",
    "CREATE INDEX IF NOT EXISTS presence_heartbeats_seen_idx
       ON presence_heartbeats(last_seen)",
  ],
};

pub static SESSIONS: FeatureSchema = FeatureSchema {
  table:   "presence_sessions",
  create:  "CREATE TABLE IF NOT EXISTS presence_sessions (
              session_id       INTEGER PRIMARY KEY AUTOINCREMENT,
              session_token    TEXT NOT NULL UNIQUE,
              record_id        INTEGER NOT NULL,
              user_id          INTEGER NOT NULL,
              opened_at        TEXT NOT NULL,
              last_seen        TEXT NOT NULL,
              closed_at        TEXT,
              duration_seconds INTEGER
            )",
  columns: &[
    ("session_token", "TEXT"),
    ("record_id", "INTEGER NOT NULL DEFAULT 0"),
    ("user_id", "INTEGER NOT NULL DEFAULT 0"),
    ("opened_at", "TEXT NOT NULL DEFAULT '1970-01-01T00:00:00.000000Z'"),
    ("last_seen", "TEXT NOT NULL DEFAULT '1970-01-01T00:00:00.000000Z'"),
    ("closed_at", "TEXT"),
    ("duration_seconds", "INTEGER"),
  ],
  indexes: &[
    "CREATE UNIQUE INDEX IF NOT EXISTS presence_sessions_token
       ON presence_sessions(session_token)",
    "CREATE INDEX IF NOT EXISTS presence_sessions_record_idx
       ON presence_sessions(record_id, opened_at)",
    "CREATE INDEX IF NOT EXISTS presence_sessions_open_idx
       ON presence_sessions(closed_at, last_seen)",
  ],
};

pub fn feature_schema(feature: Feature) -> &'static FeatureSchema {
  match feature {
    Feature::Heartbeats => &HEARTBEATS,
    Feature::Sessions => &SESSIONS,
  }
}
