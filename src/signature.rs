//! Cheap change-detection signatures.
//!
//! A [`FileSignature`] is the `(mode, size, mtime)` triplet of a file. Two
//! regular files with equal signatures are treated as unchanged without
//! reading their contents. Modification times are compared at whole-second
//! resolution, so sub-second edits are invisible.

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// File-type mask (`S_IFMT`).
pub const S_IFMT: u32 = 0o170_000;
/// Regular file type bits (`S_IFREG`).
pub const S_IFREG: u32 = 0o100_000;
/// Directory type bits (`S_IFDIR`).
pub const S_IFDIR: u32 = 0o040_000;
/// Symbolic link type bits (`S_IFLNK`).
pub const S_IFLNK: u32 = 0o120_000;

/// `(mode, size, mtime)` signature of a filesystem entry.
///
/// `mode` carries the file-type bits alongside permissions. `mtime` is whole
/// seconds since the Unix epoch and is negative for pre-epoch timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
}

impl FileSignature {
    #[must_use]
    pub const fn new(mode: u32, size: u64, mtime: i64) -> Self {
        Self { mode, size, mtime }
    }

    /// Build a signature from already-fetched metadata.
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime = meta.modified().map_or(0, system_time_to_secs);
        Self {
            mode: mode_of(meta),
            size: meta.len(),
            mtime,
        }
    }

    /// Stat `path` (following symlinks) and build its signature.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the path cannot be stat'ed.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        std::fs::metadata(path).map(|meta| Self::from_metadata(&meta))
    }

    /// Type bits only (`mode & S_IFMT`).
    #[must_use]
    pub const fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub const fn is_regular_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    /// Equality predicate used for skip decisions.
    ///
    /// Only regular files can match: a directory, symlink, or other special
    /// entry never equals a regular file regardless of size or mtime.
    #[must_use]
    pub const fn matches(&self, other: &Self) -> bool {
        self.is_regular_file()
            && other.is_regular_file()
            && self.size == other.size
            && self.mtime == other.mtime
    }

    /// Copy of this signature with a different mtime.
    #[must_use]
    pub const fn with_mtime(self, mtime: i64) -> Self {
        Self { mtime, ..self }
    }
}

/// Convert a `SystemTime` to whole seconds relative to the epoch.
///
/// Pre-epoch times floor towards negative infinity so that `-0.5s` becomes `-1`.
#[must_use]
pub fn system_time_to_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => {
            let d = e.duration();
            let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
            if d.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// Convert whole epoch seconds back into a `SystemTime`.
#[must_use]
pub fn secs_to_system_time(secs: i64) -> SystemTime {
    let magnitude = std::time::Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    let ft = meta.file_type();
    let readonly = meta.permissions().readonly();
    if ft.is_dir() {
        S_IFDIR | 0o755
    } else if ft.is_symlink() {
        S_IFLNK | 0o777
    } else if readonly {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    }
}
