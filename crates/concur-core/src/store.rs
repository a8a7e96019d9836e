//! The `RecordStore` and `PresenceStore` traits.
//!
//! The traits are implemented by storage backends (e.g. `concur-store-sqlite`).
//! The HTTP layer (`concur-api`) depends on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use crate::{
  actor::{Actor, UserId},
  audit::AuditEntry,
  presence::{Feature, PresenceSession, PresentUser, SessionToken},
  record::{NewRecord, RecordId, RecordUpdate, RecordView},
  version::UpdateOutcome,
};

/// Errors raised by a storage backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Whether retrying later may succeed (lock contention, closed connection).
  fn is_transient(&self) -> bool;
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Records with guarded updates and an append-only audit trail.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait RecordStore: Send + Sync {
  type Error: StoreError;

  /// Validate and persist a new record. Creation writes no audit entries.
  fn create_record(
    &self,
    actor: Actor,
    input: NewRecord,
  ) -> impl Future<Output = Result<RecordView, Self::Error>> + Send + '_;

  /// Read a record with its attributes and current version tokens.
  fn get_record(
    &self,
    id: RecordId,
  ) -> impl Future<Output = Result<Option<RecordView>, Self::Error>> + Send + '_;

  fn record_exists(
    &self,
    id: RecordId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Apply `update` if the caller's expected version still matches.
  ///
  /// The version check, the field and attribute writes, and the audit rows
  /// happen in one transaction. Returns `None` if the record does not exist
  /// and [`crate::version::Guarded::Conflict`] if the caller's view is stale.
  fn update_record(
    &self,
    id: RecordId,
    actor: Actor,
    update: RecordUpdate,
  ) -> impl Future<Output = Result<Option<UpdateOutcome>, Self::Error>> + Send + '_;

  /// The record's audit trail, newest first.
  fn history(
    &self,
    id: RecordId,
  ) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + '_;
}

// ─── Presence ────────────────────────────────────────────────────────────────

/// Heartbeat and session tracking.
///
/// Both features are optional: when the backing storage cannot be prepared,
/// writes become no-ops and reads return nothing. Callers never see an error
/// for a missing feature, only for failures of storage that does exist.
pub trait PresenceStore: Send + Sync {
  type Error: StoreError;

  /// Make sure the storage for `feature` exists, creating or migrating it if
  /// needed. Returns whether the feature is usable.
  fn ensure_ready(
    &self,
    feature: Feature,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Record that `actor` is looking at `record` now. Returns whether a
  /// heartbeat was stored.
  fn ping(
    &self,
    record: RecordId,
    actor: Actor,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Users with a fresh heartbeat on `record`, most recent first.
  fn list_present(
    &self,
    record: RecordId,
    excluding: Option<UserId>,
  ) -> impl Future<Output = Result<Vec<PresentUser>, Self::Error>> + Send + '_;

  /// Drop `user`'s heartbeat on `record`.
  fn leave(
    &self,
    record: RecordId,
    user: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Open a new session. Returns `None` when sessions are unavailable.
  fn open_session(
    &self,
    record: RecordId,
    actor: Actor,
  ) -> impl Future<Output = Result<Option<SessionToken>, Self::Error>> + Send + '_;

  /// Refresh an open session's `last_seen`. Returns whether a session matched.
  fn touch_session(
    &self,
    token: SessionToken,
    record: RecordId,
    user: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Close the session identified by `token`, or every open session of
  /// `user` on `record` when no token is given. Returns how many closed.
  fn close_session(
    &self,
    record: RecordId,
    user: UserId,
    token: Option<SessionToken>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Auto-close every open session not seen within the abandonment window.
  fn sweep_abandoned(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Recent sessions on `record`, newest first, open and closed.
  fn list_sessions(
    &self,
    record: RecordId,
  ) -> impl Future<Output = Result<Vec<PresenceSession>, Self::Error>> + Send + '_;
}
