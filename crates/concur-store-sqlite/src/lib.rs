//! SQLite backend for the Concur collaborative-editing layer.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Records, attributes and the audit trail
//! live in tables created at open; the presence tables are bootstrapped lazily
//! on first use (see [`SqliteStore::ensure_feature`]).

mod bootstrap;
mod encode;
mod presence;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
