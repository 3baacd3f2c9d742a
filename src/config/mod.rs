//! Configuration management.
//!
//! This module provides the tuning knobs for the store and the stat cache,
//! and the functions that locate a store file on disk.
//!
//! # Store location
//!
//! A store lives inside the export tree it describes, as
//! `<export root>/.export_state.db`. The export root defaults to the store
//! file's parent directory.

use crate::error::{Error, Result};
use crate::storage::{ExportStateStore, RetryPolicy};

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default store file name inside an export directory.
pub const DEFAULT_STORE_NAME: &str = ".export_state.db";

/// Environment variable overriding the store path.
pub const STORE_ENV: &str = "EXPORTDB_STORE";

/// Environment variable overriding the SQLite busy timeout, in milliseconds.
pub const BUSY_TIMEOUT_ENV: &str = "EXPORTDB_BUSY_TIMEOUT_MS";

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of run-result slots.
pub const DEFAULT_RESULT_CAPACITY: usize = 10;

/// Default number of run configurations kept.
pub const DEFAULT_CONFIG_HISTORY: usize = 9;

/// Default TTL for cached directory listings.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Options for opening an [`ExportStateStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root that record paths are relative to. `None` uses the store's parent.
    pub export_root: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
    /// Slots in the run-result ring. Only used when the ring is first created.
    pub result_capacity: usize,
    pub config_history: usize,
    /// Append a row to the `runs` audit table on open.
    pub record_run: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            export_root: None,
            busy_timeout: busy_timeout_from_env().unwrap_or(DEFAULT_BUSY_TIMEOUT),
            retry: RetryPolicy::default(),
            result_capacity: DEFAULT_RESULT_CAPACITY,
            config_history: DEFAULT_CONFIG_HISTORY,
            record_run: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_export_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.export_root = Some(root.into());
        self
    }

    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_config_history(mut self, keep: usize) -> Self {
        self.config_history = keep;
        self
    }

    #[must_use]
    pub const fn with_record_run(mut self, record: bool) -> Self {
        self.record_run = record;
        self
    }

    /// Export root for a store at `store_path`.
    #[must_use]
    pub fn export_root_for(&self, store_path: &Path) -> PathBuf {
        self.export_root.clone().unwrap_or_else(|| {
            store_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        })
    }
}

/// Options for a [`crate::stat_cache::DirectoryStatCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a directory listing is trusted.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Read [`BUSY_TIMEOUT_ENV`], ignoring unparseable values.
#[must_use]
pub fn busy_timeout_from_env() -> Option<Duration> {
    std::env::var(BUSY_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Resolve the store path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it
/// 2. `EXPORTDB_STORE` environment variable
/// 3. `.export_state.db` in the current directory
///
/// A path naming an existing directory resolves to the store file inside it.
#[must_use]
pub fn resolve_store_path(explicit_path: Option<&Path>) -> PathBuf {
    let chosen = explicit_path.map(Path::to_path_buf).or_else(|| {
        std::env::var(STORE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    });

    match chosen {
        Some(path) if path.is_dir() => path.join(DEFAULT_STORE_NAME),
        Some(path) => path,
        None => PathBuf::from(DEFAULT_STORE_NAME),
    }
}

/// Walk up from `path` looking for a directory that holds a store file.
#[must_use]
pub fn find_store_for_path(path: &Path) -> Option<PathBuf> {
    let start = if path.is_dir() { Some(path) } else { path.parent() };
    let mut dir = start?;
    loop {
        let candidate = dir.join(DEFAULT_STORE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
}

/// Asset that produced the exported file at `path`, if any store knows it.
///
/// # Errors
///
/// Returns [`Error::StoreNotFound`] when no store exists above `path`, or any
/// error from opening the store.
pub fn asset_id_for_output(path: &Path) -> Result<Option<String>> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let store_path = find_store_for_path(&absolute).ok_or_else(|| Error::StoreNotFound {
        path: absolute.clone(),
    })?;
    let store = ExportStateStore::open_existing(&store_path, StoreConfig::default().with_record_run(false))?;
    let asset = store.get_asset_id_for_path(&absolute)?;
    store.close();
    Ok(asset)
}
