//! SQLite storage layer for export state.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode and relaxed sync for a local single-writer cache
//! - A store-wide mutex linearizing every operation
//! - Ordered, re-entrant schema migrations applied on open
//! - Uniform retry of transiently busy operations
//!
//! # Submodules
//!
//! - [`schema`] - Table layout and version row
//! - [`migrations`] - Historical schema upgrades
//! - [`retry`] - Retry policy
//! - [`store`] - [`ExportStateStore`]
//! - [`record`] - Per-record handle and scoped transactions
//! - [`memory`] - In-memory overlay store
//! - [`maintenance`] - Signature check/update and touch passes

pub mod maintenance;
pub mod memory;
pub mod migrations;
pub mod record;
pub mod retry;
pub mod schema;
pub mod store;

pub use memory::InMemoryStore;
pub use record::{FileRecord, RecordError, RecordHandle, RecordTxn};
pub use retry::RetryPolicy;
pub use store::{ConfigSnapshot, ErrorEntry, ExportStateStore, ExportedFiles, QueryRows, RunRecord};
