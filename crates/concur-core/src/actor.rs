//! The acting user, passed explicitly into every operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a user as issued by the identity provider.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// An authenticated user together with the display name the identity
/// provider reported for them.
///
/// The store records the display name whenever the actor writes so that
/// presence and history reads can show who is who.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id:      UserId,
  pub display_name: String,
}

impl Actor {
  pub fn new(user_id: i64, display_name: impl Into<String>) -> Self {
    Self { user_id: UserId(user_id), display_name: display_name.into() }
  }
}
