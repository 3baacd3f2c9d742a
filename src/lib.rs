//! exportdb - incremental export state for photo export tools
//!
//! This crate records, for every file an export run produced, which source
//! asset it came from and the filesystem signatures needed to decide whether
//! a later run can skip it. A directory stat cache answers existence and
//! signature queries for output folders with one listing per directory.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`storage`] - SQLite export state store, migrations and maintenance
//! - [`stat_cache`] - Per-directory listing and stat cache
//! - [`signature`] - `(mode, size, mtime)` file signatures
//! - [`path`] - Canonical path keys
//! - [`digest`] - Content digests and option fingerprints
//! - [`config`] - Store and cache configuration, store discovery
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod path;
pub mod signature;
pub mod stat_cache;
pub mod storage;

pub use error::{Error, Result};
pub use signature::FileSignature;
pub use stat_cache::DirectoryStatCache;
pub use storage::{ExportStateStore, InMemoryStore};
