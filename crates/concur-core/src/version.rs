//! Version tokens and the optimistic-concurrency comparison.
//!
//! A record's version is derived, never stored on its own: it is the pair of
//! the record's `updated_at` and the highest sequence number in its audit
//! trail. An update carries the tokens its author observed at read time; if
//! the authoritative tokens have moved since, the update is refused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::FieldChange;

/// The authoritative version of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken {
  pub updated_at:  DateTime<Utc>,
  /// Highest audit sequence number for the record; `0` when it has none.
  pub history_seq: i64,
}

/// The tokens an editor observed when it read the record.
///
/// Both halves are optional. A caller supplying neither is applied
/// unconditionally: legacy and first-time clients predate the tokens, and
/// tightening this needs product sign-off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedVersion {
  pub updated_at:  Option<DateTime<Utc>>,
  pub history_seq: Option<i64>,
}

impl ExpectedVersion {
  /// Expect exactly `token`.
  pub fn exactly(token: VersionToken) -> Self {
    Self { updated_at: Some(token.updated_at), history_seq: Some(token.history_seq) }
  }

  pub fn is_unconditional(&self) -> bool {
    self.updated_at.is_none() && self.history_seq.is_none()
  }
}

/// An update was refused because the editor's view was stale.
///
/// Carries the current tokens so the editor can reload without losing its
/// draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConflict {
  pub current: VersionToken,
}

/// Compare the authoritative version against what the caller expected.
///
/// Each supplied half must match; a half left as `None` is not checked.
pub fn check_version(
  current: &VersionToken,
  expected: &ExpectedVersion,
) -> Result<(), VersionConflict> {
  let stale_time = expected
    .updated_at
    .is_some_and(|at| at != current.updated_at);
  let stale_seq = expected
    .history_seq
    .is_some_and(|seq| seq != current.history_seq);

  if stale_time || stale_seq {
    Err(VersionConflict { current: *current })
  } else {
    Ok(())
  }
}

/// Result of a version-guarded mutation. A conflict is an expected outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
  Applied(T),
  Conflict(VersionConflict),
}

impl<T> Guarded<T> {
  pub fn is_conflict(&self) -> bool { matches!(self, Self::Conflict(_)) }

  pub fn applied(self) -> Option<T> {
    match self {
      Self::Applied(t) => Some(t),
      Self::Conflict(_) => None,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
    match self {
      Self::Applied(t) => Guarded::Applied(f(t)),
      Self::Conflict(c) => Guarded::Conflict(c),
    }
  }
}

/// What a successful guarded update produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedUpdate {
  /// Tokens to use for the next save.
  pub version: VersionToken,
  /// Audit entries actually written for this save.
  pub changes: Vec<FieldChange>,
}

pub type UpdateOutcome = Guarded<AppliedUpdate>;

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn token(secs: i64, seq: i64) -> VersionToken {
    VersionToken {
      updated_at:  Utc.timestamp_opt(secs, 0).unwrap(),
      history_seq: seq,
    }
  }

  #[test]
  fn unconditional_always_passes() {
    let expected = ExpectedVersion::default();
    assert!(expected.is_unconditional());
    assert!(check_version(&token(10, 3), &expected).is_ok());
  }

  #[test]
  fn matching_tokens_pass() {
    let current = token(10, 3);
    assert!(check_version(&current, &ExpectedVersion::exactly(current)).is_ok());
  }

  #[test]
  fn stale_timestamp_conflicts_with_current_tokens() {
    let current = token(20, 3);
    let expected =
      ExpectedVersion { updated_at: Some(token(10, 3).updated_at), history_seq: None };
    let conflict = check_version(&current, &expected).unwrap_err();
    assert_eq!(conflict.current, current);
  }

  #[test]
  fn stale_history_seq_conflicts_alone() {
    let current = token(10, 4);
    let expected = ExpectedVersion { updated_at: None, history_seq: Some(3) };
    assert!(check_version(&current, &expected).is_err());
  }

  #[test]
  fn guarded_map_keeps_conflict() {
    let conflict = VersionConflict { current: token(1, 0) };
    let g: Guarded<i32> = Guarded::Conflict(conflict);
    assert!(g.map(|n| n + 1).is_conflict());
    assert_eq!(Guarded::Applied(1).map(|n| n + 1).applied(), Some(2));
  }
}
