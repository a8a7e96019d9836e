//! Core types and trait definitions for the Concur collaborative-editing
//! layer.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the record model, the pure comparison logic (attribute canonicalization,
//! snapshot diffing, version checks, presence freshness) and the storage traits
//! that backends implement.

pub mod activity;
pub mod actor;
pub mod audit;
pub mod canonical;
pub mod clock;
pub mod error;
pub mod presence;
pub mod record;
pub mod store;
pub mod version;

pub use error::{Error, Result};
