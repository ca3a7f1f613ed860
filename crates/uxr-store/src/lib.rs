//! The durable relational store for studies, sessions, steps, issues,
//! insights, and schedules.
//!
//! Backed by sqlite (via `rusqlite`) with WAL mode and foreign-key cascades,
//! matching the durable-store capability the rest of the runtime depends on
//! without coupling callers to a specific RDBMS.

pub mod entities;
pub mod schema;
pub mod store;

pub use entities::*;
pub use schema::SCHEMA_VERSION;
pub use store::SqliteStore;
