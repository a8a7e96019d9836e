//! Lazy, idempotent preparation of the optional presence tables.
//!
//! Several handlers (and several processes) may race to prepare the same
//! feature. Every step is either a no-op when already applied or fails with an
//! "already exists" style error that is logged and ignored, so no caller ever
//! sees a bootstrap error. When the table still cannot be found afterwards the
//! feature is reported unavailable and its operations degrade to no-ops.

use std::{
  collections::HashSet,
  sync::atomic::{AtomicBool, Ordering},
};

use concur_core::presence::Feature;
use rusqlite::Connection;

use crate::schema::FeatureSchema;

// ─── Availability cache ──────────────────────────────────────────────────────

/// Per-feature "known ready" flags shared by all clones of a store.
///
/// Only success is cached. A feature that failed to bootstrap is retried on
/// the next call, so a transient failure does not disable it for the life of
/// the process.
#[derive(Debug, Default)]
pub struct FeatureAvailability {
  heartbeats: AtomicBool,
  sessions:   AtomicBool,
}

impl FeatureAvailability {
  fn flag(&self, feature: Feature) -> &AtomicBool {
    match feature {
      Feature::Heartbeats => &self.heartbeats,
      Feature::Sessions => &self.sessions,
    }
  }

  pub fn is_ready(&self, feature: Feature) -> bool {
    self.flag(feature).load(Ordering::Acquire)
  }

  pub fn mark_ready(&self, feature: Feature) {
    self.flag(feature).store(true, Ordering::Release);
  }
}

// ─── Ensure routine ──────────────────────────────────────────────────────────

/// Create `schema.table` if missing, then add any missing columns and indexes.
///
/// Returns whether the table exists once done. Never fails: every error is
/// logged and folded into the return value.
pub fn ensure_feature(conn: &Connection, schema: &FeatureSchema) -> bool {
  let table = schema.table;

  match table_exists(conn, table) {
    Ok(true) => {}
    Ok(false) => {
      if let Err(error) = conn.execute_batch(schema.create) {
        tracing::warn!(table, %error, "creating feature table failed");
      }
      match table_exists(conn, table) {
        Ok(true) => {}
        Ok(false) => {
          tracing::warn!(table, "feature table unavailable after create");
          return false;
        }
        Err(error) => {
          tracing::warn!(table, %error, "feature table check failed");
          return false;
        }
      }
    }
    Err(error) => {
      tracing::warn!(table, %error, "feature table check failed");
      return false;
    }
  }

  add_missing_columns(conn, schema);

  for ddl in schema.indexes {
    if let Err(error) = conn.execute_batch(ddl) {
      tracing::warn!(table, %error, "creating feature index failed");
    }
  }

  true
}

fn add_missing_columns(conn: &Connection, schema: &FeatureSchema) {
  let table = schema.table;
  let present = match column_names(conn, table) {
    Ok(names) => names,
    Err(error) => {
      tracing::warn!(table, %error, "reading feature table columns failed");
      return;
    }
  };

  for (column, decl) in schema.columns {
    if present.contains(*column) {
      continue;
    }
    let ddl = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
    match conn.execute_batch(&ddl) {
      Ok(()) => tracing::info!(table, column, "added missing column"),
      Err(error) => tracing::warn!(table, column, %error, "adding column failed"),
    }
  }
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
  conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    rusqlite::params![table],
    |row| row.get(0),
  )
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  let names = stmt
    .query_map([], |row| row.get::<_, String>(1))?
    .collect::<rusqlite::Result<HashSet<_>>>()?;
  Ok(names)
}
