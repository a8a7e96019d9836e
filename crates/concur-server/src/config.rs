//! Runtime configuration, deserialised from `config.toml` and `CONCUR_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use concur_core::presence::PresencePolicy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                 String,
  pub port:                 u16,
  pub store_path:           PathBuf,
  /// Seconds a heartbeat keeps a user listed as present.
  pub heartbeat_ttl_secs:   u64,
  /// Seconds without a touch after which an open session is auto-closed.
  pub session_abandon_secs: u64,
  pub session_list_limit:   usize,
  /// Seconds between background sweeps of abandoned sessions.
  pub sweep_interval_secs:  u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                 "127.0.0.1".to_string(),
      port:                 8080,
      store_path:           PathBuf::from("~/.local/share/concur/concur.db"),
      heartbeat_ttl_secs:   6,
      session_abandon_secs: 120,
      session_list_limit:   200,
      sweep_interval_secs:  30,
    }
  }
}

impl ServerConfig {
  pub fn policy(&self) -> PresencePolicy {
    PresencePolicy {
      heartbeat_ttl:         secs(self.heartbeat_ttl_secs),
      session_abandon_after: secs(self.session_abandon_secs),
      session_list_limit:    self.session_list_limit,
    }
  }

  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }
}

fn secs(n: u64) -> chrono::TimeDelta {
  i64::try_from(n)
    .ok()
    .and_then(chrono::TimeDelta::try_seconds)
    .unwrap_or(chrono::TimeDelta::MAX)
}
