//! In-memory overlay of an export state store.
//!
//! Dry runs and tests work against a transient copy: [`InMemoryStore::open`]
//! copies a durable file into memory and every read or write afterwards hits
//! only the copy. [`InMemoryStore::flush`] writes the copy back. The durable
//! file is moved aside before the write and only removed once the new file
//! passes an integrity check, so a failed flush leaves the old state in place.

use super::schema::{self, CURRENT_SCHEMA_VERSION};
use super::store::ExportStateStore;
use crate::config::StoreConfig;
use crate::error::{Error, Result};

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const BACKUP_SUFFIX: &str = ".flush-bak";
const SIBLINGS: [&str; 3] = ["", "-wal", "-shm"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", path.display()))
}

/// An [`ExportStateStore`] whose connection lives entirely in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    store: ExportStateStore,
    /// File the copy was loaded from and flushes to. `None` when disposable.
    durable: Option<PathBuf>,
}

impl InMemoryStore {
    /// Copy the store at `path` into memory. A missing file starts empty and
    /// is created by the first flush.
    ///
    /// Migrations run on the copy only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be copied or migrated.
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        if path.is_file() {
            conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)?;
            info!(path = %path.display(), "Loaded export state store into memory");
        }
        let store = ExportStateStore::from_connection(conn, path, config)?;
        Ok(Self {
            store,
            durable: Some(path.to_path_buf()),
        })
    }

    /// A fresh in-memory store that is never persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn disposable(export_root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let config = config.with_export_root(export_root);
        let store = ExportStateStore::from_connection(conn, Path::new(":memory:"), config)?;
        Ok(Self {
            store,
            durable: None,
        })
    }

    #[must_use]
    pub fn durable_path(&self) -> Option<&Path> {
        self.durable.as_deref()
    }

    #[must_use]
    pub const fn is_disposable(&self) -> bool {
        self.durable.is_none()
    }

    /// Write the in-memory copy back to its durable file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a disposable store. On a failed
    /// write or check, the previous file is restored and the error returned.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.durable.as_deref() else {
            return Err(Error::InvalidArgument(
                "a disposable store has no file to flush to".to_string(),
            ));
        };
        self.flush_with(path, |target| {
            self.store.with_conn("flush", |conn| {
                conn.backup(DatabaseName::Main, target, None)?;
                Ok(())
            })
        })
    }

    fn flush_with<W>(&self, path: &Path, write: W) -> Result<()>
    where
        W: FnOnce(&Path) -> Result<()>,
    {
        let moved = relocate(path)?;

        match write(path).and_then(|()| verify(path)) {
            Ok(()) => {
                for backup in moved {
                    if let Err(e) = std::fs::remove_file(&backup) {
                        warn!(path = %backup.display(), error = %e, "Could not remove flush backup");
                    }
                }
                info!(path = %path.display(), "Flushed in-memory store");
                Ok(())
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Flush failed; restoring previous file");
                for suffix in SIBLINGS {
                    let written = with_suffix(path, suffix);
                    if written.exists() {
                        std::fs::remove_file(&written)?;
                    }
                }
                for backup in moved {
                    let original = PathBuf::from(
                        backup
                            .to_string_lossy()
                            .trim_end_matches(BACKUP_SUFFIX)
                            .to_string(),
                    );
                    std::fs::rename(&backup, &original)?;
                }
                Err(err)
            }
        }
    }
}

/// Move the store file and its siblings aside. Returns the backup paths.
fn relocate(path: &Path) -> Result<Vec<PathBuf>> {
    let mut moved = Vec::new();
    for suffix in SIBLINGS {
        let src = with_suffix(path, suffix);
        if src.exists() {
            let dest = with_suffix(&src, BACKUP_SUFFIX);
            std::fs::rename(&src, &dest)?;
            moved.push(dest);
        }
    }
    Ok(moved)
}

/// Integrity-check a freshly written store file.
fn verify(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let status: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if status != "ok" {
        return Err(Error::Other(format!(
            "integrity check of {} failed: {status}",
            path.display()
        )));
    }
    match schema::read_version(&conn)? {
        Some((_, version)) if version == CURRENT_SCHEMA_VERSION => Ok(()),
        other => Err(Error::Other(format!(
            "flushed store {} has unexpected version {other:?}",
            path.display()
        ))),
    }
}

impl Deref for InMemoryStore {
    type Target = ExportStateStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn durable_with_record(dir: &Path) -> PathBuf {
        let path = dir.join(".state.db");
        let store = ExportStateStore::open(&path, StoreConfig::default()).unwrap();
        store.get_or_create_record("kept.jpg", "U1").unwrap();
        store.close();
        path
    }

    fn count_records(path: &Path) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM export_data", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_writes_stay_in_memory_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = durable_with_record(dir.path());

        let overlay = InMemoryStore::open(&path, StoreConfig::default()).unwrap();
        assert!(overlay.get_record("kept.jpg").unwrap().is_some());
        overlay.get_or_create_record("new.jpg", "U2").unwrap();
        assert_eq!(count_records(&path), 1);

        overlay.flush().unwrap();
        assert_eq!(count_records(&path), 2);
        assert!(!with_suffix(&path, BACKUP_SUFFIX).exists());
    }

    #[test]
    fn test_failed_flush_restores_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = durable_with_record(dir.path());

        let overlay = InMemoryStore::open(&path, StoreConfig::default()).unwrap();
        overlay.get_or_create_record("new.jpg", "U2").unwrap();

        let result = overlay.flush_with(&path, |target| {
            std::fs::write(target, b"half written")?;
            Err(Error::Other("disk full".into()))
        });
        assert!(result.is_err());
        assert_eq!(count_records(&path), 1);
        assert!(!with_suffix(&path, BACKUP_SUFFIX).exists());
    }

    #[test]
    fn test_open_missing_file_creates_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".state.db");
        let overlay = InMemoryStore::open(&path, StoreConfig::default()).unwrap();
        assert!(overlay.was_created());
        assert!(!path.exists());

        overlay.get_or_create_record("a.jpg", "U").unwrap();
        overlay.flush().unwrap();
        assert_eq!(count_records(&path), 1);
    }

    #[test]
    fn test_disposable_cannot_flush() {
        let store = InMemoryStore::disposable("/export", StoreConfig::default()).unwrap();
        assert!(store.is_disposable());
        assert_eq!(store.export_root(), Path::new("/export"));
        store.get_or_create_record("/export/a.jpg", "U").unwrap();
        assert!(matches!(store.flush().unwrap_err(), Error::InvalidArgument(_)));
    }
}
