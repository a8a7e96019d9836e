//! Best-effort activity notifications for operational visibility.

use crate::{
  actor::UserId,
  record::RecordId,
  version::VersionToken,
};

/// An event worth surfacing to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
  RecordCreated {
    record_id: RecordId,
    actor_id:  UserId,
  },
  RecordUpdated {
    record_id:      RecordId,
    actor_id:       UserId,
    version:        VersionToken,
    changed_fields: usize,
  },
  UpdateConflict {
    record_id: RecordId,
    actor_id:  UserId,
    current:   VersionToken,
  },
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives activity events. A failing sink never affects the operation that
/// produced the event; see [`notify`].
pub trait ActivitySink: Send + Sync {
  fn record(&self, event: &ActivityEvent) -> Result<(), SinkError>;
}

/// Deliver `event` to `sink`, logging and discarding any failure.
pub fn notify(sink: &dyn ActivitySink, event: &ActivityEvent) {
  if let Err(error) = sink.record(event) {
    tracing::warn!(%error, ?event, "activity sink rejected event");
  }
}

/// Writes activity events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivity;

impl ActivitySink for TracingActivity {
  fn record(&self, event: &ActivityEvent) -> Result<(), SinkError> {
    match event {
      ActivityEvent::RecordCreated { record_id, actor_id } => {
        tracing::info!(%record_id, %actor_id, "record created");
      }
      ActivityEvent::RecordUpdated { record_id, actor_id, version, changed_fields } => {
        tracing::info!(
          %record_id,
          %actor_id,
          updated_at = %version.updated_at,
          history_seq = version.history_seq,
          changed_fields,
          "record updated"
        );
      }
      ActivityEvent::UpdateConflict { record_id, actor_id, current } => {
        tracing::warn!(
          %record_id,
          %actor_id,
          current_updated_at = %current.updated_at,
          current_history_seq = current.history_seq,
          "update rejected: stale version"
        );
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  struct Failing(AtomicUsize);

  impl ActivitySink for Failing {
    fn record(&self, _: &ActivityEvent) -> Result<(), SinkError> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Err("sink offline".into())
    }
  }

  #[test]
  fn notify_swallows_sink_failures() {
    let sink = Failing(AtomicUsize::new(0));
    let event = ActivityEvent::RecordCreated { record_id: RecordId(1), actor_id: UserId(2) };
    notify(&sink, &event);
    assert_eq!(sink.0.load(Ordering::SeqCst), 1);
  }
}
