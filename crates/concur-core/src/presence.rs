//! Ephemeral presence: heartbeats and open/close sessions.
//!
//! Heartbeats answer "who is looking at this record right now". They expire
//! passively after a short TTL, so a client that vanishes needs no explicit
//! close. Sessions answer "how long was this record open" and follow an
//! explicit open → close lifecycle, with a longer auto-close for abandoned
//! ones.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{actor::UserId, record::RecordId};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Timing parameters for presence tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
  /// A heartbeat older than this no longer counts as present.
  pub heartbeat_ttl:         TimeDelta,
  /// An open session not touched for this long is auto-closed.
  pub session_abandon_after: TimeDelta,
  /// Maximum number of sessions returned by a session listing.
  pub session_list_limit:    usize,
}

impl Default for PresencePolicy {
  fn default() -> Self {
    Self {
      heartbeat_ttl:         TimeDelta::seconds(6),
      session_abandon_after: TimeDelta::minutes(2),
      session_list_limit:    200,
    }
  }
}

impl PresencePolicy {
  pub fn heartbeat_freshness(&self) -> Freshness { Freshness::new(self.heartbeat_ttl) }

  pub fn session_freshness(&self) -> Freshness {
    Freshness::new(self.session_abandon_after)
  }
}

/// The freshness predicate for TTL-expiring rows.
///
/// A row last seen at `T` is fresh for reads at any time in `[T, T + ttl)`.
/// Storage backends filter with [`Freshness::cutoff`] so the rule lives in
/// one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
  ttl: TimeDelta,
}

impl Freshness {
  pub fn new(ttl: TimeDelta) -> Self { Self { ttl } }

  /// Rows last seen strictly after this instant are fresh. A TTL reaching
  /// past the representable range keeps every row fresh.
  pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
  }

  pub fn is_fresh(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    last_seen > self.cutoff(now)
  }
}

// ─── Features ────────────────────────────────────────────────────────────────

/// Optional storage features that are bootstrapped lazily on first use and
/// degrade to no-ops when unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
  Heartbeats,
  Sessions,
}

impl Feature {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Heartbeats => "heartbeats",
      Self::Sessions => "sessions",
    }
  }
}

impl fmt::Display for Feature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Heartbeats ──────────────────────────────────────────────────────────────

/// A user currently present on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentUser {
  pub user_id:      UserId,
  pub display_name: Option<String>,
  pub last_seen:    DateTime<Utc>,
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// Opaque, high-entropy identifier of a presence session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
  /// Number of random bytes behind a token.
  pub const ENTROPY_BYTES: usize = 16;

  /// Generate a fresh token from the operating system's RNG.
  pub fn generate() -> Self {
    let mut bytes = [0u8; Self::ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Self(hex::encode(bytes))
  }

  /// Parse a client-supplied token; blank input means "no token".
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| Self(raw.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SessionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// A presence session as listed for analytics. The token is not exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSession {
  pub record_id:        RecordId,
  pub user_id:          UserId,
  pub display_name:     Option<String>,
  pub opened_at:        DateTime<Utc>,
  pub last_seen:        DateTime<Utc>,
  pub closed_at:        Option<DateTime<Utc>>,
  /// Fixed at close time as `closed_at - opened_at`, in whole seconds.
  pub duration_seconds: Option<i64>,
}

impl PresenceSession {
  pub fn is_open(&self) -> bool { self.closed_at.is_none() }
}

/// Whole seconds between `opened_at` and `closed_at`, never negative.
pub fn session_duration(opened_at: DateTime<Utc>, closed_at: DateTime<Utc>) -> i64 {
  (closed_at - opened_at).num_seconds().max(0)
}
