//! JSON REST API for Concur.
//!
//! Exposes an axum [`Router`] backed by any store implementing both
//! [`RecordStore`] and [`PresenceStore`]. Authentication happens upstream;
//! the acting user arrives in request headers (see [`actor::CurrentActor`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", concur_api::router(state))
//! ```

pub mod actor;
pub mod body;
pub mod error;
pub mod presence;
pub mod records;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use concur_core::{
  activity::{ActivitySink, TracingActivity},
  store::{PresenceStore, RecordStore},
};

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct ApiState<S> {
  pub store:    Arc<S>,
  pub activity: Arc<dyn ActivitySink>,
}

impl<S> ApiState<S> {
  /// State that reports activity through `tracing`.
  pub fn new(store: Arc<S>) -> Self {
    Self { store, activity: Arc::new(TracingActivity) }
  }

  pub fn with_activity(mut self, activity: Arc<dyn ActivitySink>) -> Self {
    self.activity = activity;
    self
  }
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), activity: Arc::clone(&self.activity) }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn router<S>(state: ApiState<S>) -> Router<()>
where
  S: RecordStore + PresenceStore + 'static,
{
  Router::new()
    // Records
    .route("/records", post(records::create::<S>))
    .route("/records/{id}", get(records::get_one::<S>).put(records::update::<S>))
    .route("/records/{id}/history", get(records::history::<S>))
    // Presence
    .route("/records/{id}/presence", get(presence::list::<S>))
    .route("/records/{id}/presence/ping", post(presence::ping::<S>))
    .route("/records/{id}/presence/leave", post(presence::leave::<S>))
    .route(
      "/records/{id}/presence/sessions",
      get(presence::list_sessions::<S>).post(presence::open_session::<S>),
    )
    .with_state(state)
}
