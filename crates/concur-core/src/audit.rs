//! Field-level audit trail.
//!
//! Each save compares the record before and after, field by field, and emits
//! one [`FieldChange`] per field whose normalized value actually moved.
//! Persisted changes become immutable [`AuditEntry`] rows.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  actor::UserId,
  canonical::canonicalize,
  record::{Attributes, RecordFields, RecordId, ScalarField},
};

/// Prefix distinguishing attribute-keyed audit fields from core fields,
/// e.g. `meta:qa_status`.
pub const META_PREFIX: &str = "meta:";

/// A single field whose value differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
  pub field:     String,
  pub old_value: String,
  pub new_value: String,
}

/// An immutable audit row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
  pub record_id:   RecordId,
  /// Sequence number within the record's trail, starting at 1.
  pub seq:         i64,
  pub actor_id:    UserId,
  pub actor_name:  Option<String>,
  pub field:       String,
  pub old_value:   String,
  pub new_value:   String,
  pub recorded_at: DateTime<Utc>,
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// The state of a record as seen by the recorder: core fields plus raw
/// attribute values in whatever encoding they were stored or submitted in.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub fields:     RecordFields,
  pub attributes: BTreeMap<String, Value>,
}

impl Snapshot {
  /// Build a snapshot from stored rows.
  pub fn from_stored(fields: RecordFields, attributes: &Attributes) -> Self {
    let attributes = attributes
      .iter()
      .map(|(k, vs)| {
        let values = vs.iter().cloned().map(Value::String).collect();
        (k.clone(), Value::Array(values))
      })
      .collect();
    Self { fields, attributes }
  }

  /// The snapshot after replacing the core fields and the attribute keys named
  /// in `overrides`; other attributes carry over untouched.
  pub fn with_overrides(
    &self,
    fields: RecordFields,
    overrides: &BTreeMap<String, Value>,
  ) -> Self {
    let mut attributes = self.attributes.clone();
    for (key, raw) in overrides {
      attributes.insert(key.clone(), raw.clone());
    }
    Self { fields, attributes }
  }
}

/// Compute the changed fields between `old` and `new`.
///
/// Core fields compare after trimming. Attributes compare as canonical sets,
/// so a reordering or re-encoding of the same values is not a change. The
/// recorded values are the trimmed strings for core fields and the
/// comma-joined canonical sequences for attributes.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<FieldChange> {
  let mut changes = Vec::new();

  for field in ScalarField::ALL {
    let before = old.fields.value(field).trim();
    let after = new.fields.value(field).trim();
    if before != after {
      changes.push(FieldChange {
        field:     field.as_str().to_owned(),
        old_value: before.to_owned(),
        new_value: after.to_owned(),
      });
    }
  }

  let keys: BTreeSet<&String> =
    old.attributes.keys().chain(new.attributes.keys()).collect();
  for key in keys {
    let before = canonicalize(key, old.attributes.get(key).unwrap_or(&Value::Null));
    let after = canonicalize(key, new.attributes.get(key).unwrap_or(&Value::Null));
    if before != after {
      changes.push(FieldChange {
        field:     format!("{META_PREFIX}{key}"),
        old_value: before.joined(),
        new_value: after.joined(),
      });
    }
  }

  changes
}
