//! Time source abstraction.
//!
//! Every timestamp this layer writes comes from a [`Clock`], so TTL and
//! duration behaviour can be driven deterministically in tests.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Arc::new(Mutex::new(start)) }
  }

  pub fn advance(&self, by: TimeDelta) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// `clock.now()` truncated to the microsecond precision used for storage.
pub fn now_micros(clock: &dyn Clock) -> DateTime<Utc> { clock.now().trunc_subsecs(6) }

/// The next `updated_at` for a record last written at `previous`: `now`, or one
/// microsecond past `previous` if the clock has not moved beyond it.
pub fn advance_past(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
  if now > previous { now } else { previous + TimeDelta::microseconds(1) }
}
