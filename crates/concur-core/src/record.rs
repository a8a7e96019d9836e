//! Records: the shared mutable entities guarded by this layer.
//!
//! A record carries a handful of single-valued core fields plus an open-ended
//! set of multi-valued named attributes. Attribute sets are always replaced
//! whole; there is no partial patch.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, actor::UserId, version::{ExpectedVersion, VersionToken}};

/// Identifier of a record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

// ─── Core fields ─────────────────────────────────────────────────────────────

/// The single-valued core fields of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
  #[serde(default)]
  pub title:    String,
  #[serde(default)]
  pub body:     String,
  /// Status reference, e.g. "Open" or "Resolved".
  pub status:   Option<String>,
  /// Priority reference, e.g. "High".
  pub priority: Option<String>,
  /// Severity label, e.g. "major".
  pub severity: Option<String>,
}

/// Names of the scalar fields tracked by the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
  Title,
  Body,
  Status,
  Priority,
  Severity,
}

impl ScalarField {
  pub const ALL: [ScalarField; 5] =
    [Self::Title, Self::Body, Self::Status, Self::Priority, Self::Severity];

  /// The field name recorded in audit entries.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Title => "title",
      Self::Body => "body",
      Self::Status => "status",
      Self::Priority => "priority",
      Self::Severity => "severity",
    }
  }
}

impl RecordFields {
  /// The raw value of `field`; absent optional fields read as empty.
  pub fn value(&self, field: ScalarField) -> &str {
    match field {
      ScalarField::Title => &self.title,
      ScalarField::Body => &self.body,
      ScalarField::Status => self.status.as_deref().unwrap_or(""),
      ScalarField::Priority => self.priority.as_deref().unwrap_or(""),
      ScalarField::Severity => self.severity.as_deref().unwrap_or(""),
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(Error::validation("title", "title is required"));
    }
    Ok(())
  }
}

// ─── Attributes ──────────────────────────────────────────────────────────────

/// Stored attribute values keyed by attribute name, one entry per row.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Longest accepted attribute key.
pub const MAX_ATTRIBUTE_KEY_LEN: usize = 64;

/// Reject attribute keys that could not have come from a form field.
pub fn validate_attribute_key(key: &str) -> Result<()> {
  let field = format!("attributes.{key}");
  if key.is_empty() || key.len() > MAX_ATTRIBUTE_KEY_LEN {
    return Err(Error::validation(field, "attribute key must be 1-64 characters"));
  }
  if !key
    .chars()
    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
  {
    return Err(Error::validation(
      field,
      "attribute key may contain only a-z, 0-9 and '_'",
    ));
  }
  Ok(())
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A persisted record. `updated_at` is authoritative and only advances through
/// a guarded update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub record_id:  RecordId,
  #[serde(flatten)]
  pub fields:     RecordFields,
  pub created_by: UserId,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Input to [`crate::store::RecordStore::create_record`].
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
  pub fields:     RecordFields,
  /// Raw attribute input; each value may be any supported encoding.
  pub attributes: BTreeMap<String, Value>,
}

impl NewRecord {
  pub fn validate(&self) -> Result<()> {
    self.fields.validate()?;
    self.attributes.keys().try_for_each(|k| validate_attribute_key(k))
  }
}

/// Input to [`crate::store::RecordStore::update_record`].
///
/// Core fields are replaced wholesale. Only attribute keys present in
/// `attributes` are touched; an empty value clears that attribute.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
  pub fields:     RecordFields,
  pub attributes: BTreeMap<String, Value>,
  pub expected:   ExpectedVersion,
}

impl RecordUpdate {
  pub fn validate(&self) -> Result<()> {
    self.fields.validate()?;
    self.attributes.keys().try_for_each(|k| validate_attribute_key(k))
  }
}

/// A record as read by an editor: core fields, attributes, and the version
/// tokens to send back with the next save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordView {
  pub record:     Record,
  pub attributes: Attributes,
  pub version:    VersionToken,
}
