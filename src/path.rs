//! Canonical path keys for the export state store.
//!
//! Every path the store sees is relativized to the export root, rendered with
//! `/` separators, composed to Unicode NFC and (for the lookup key) lowercased.
//! Two byte-distinct spellings of the same name therefore collide on one key,
//! whichever normalization form or case the host filesystem happened to hand
//! back.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// A path relative to the export root in both of its stored forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    /// Original case, NFC, `/`-separated.
    pub raw: String,
    /// Lowercased `raw`; the unique store key.
    pub normalized: String,
}

/// Compose `s` to NFC.
#[must_use]
pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Compose to NFC then case-fold.
#[must_use]
pub fn fold(s: &str) -> String {
    nfc(s).to_lowercase()
}

/// Build the key for `path`, which may be absolute (under `root`) or already
/// relative to it.
///
/// `.` components are dropped and `..` is resolved lexically. A path that
/// escapes `root` is rejected.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an empty path, a path outside the
/// export root, or one that is not valid UTF-8.
pub fn path_key(root: &Path, path: &Path) -> Result<PathKey> {
    let relative = relativize(root, path)?;
    let raw = nfc(&relative);
    let normalized = raw.to_lowercase();
    Ok(PathKey { raw, normalized })
}

/// Resolve a stored (relative, `/`-separated) path back under `root`.
#[must_use]
pub fn absolute(root: &Path, stored: &str) -> PathBuf {
    stored
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

fn relativize(root: &Path, path: &Path) -> Result<String> {
    let rel: PathBuf = if path.is_absolute() {
        let root_clean = lexical_clean(root);
        let path_clean = lexical_clean(path);
        path_clean
            .strip_prefix(&root_clean)
            .map(Path::to_path_buf)
            .map_err(|_| {
                Error::InvalidArgument(format!(
                    "{} is outside the export directory {}",
                    path.display(),
                    root.display()
                ))
            })?
    } else {
        path.to_path_buf()
    };

    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(os) => {
                let part = os.to_str().ok_or_else(|| {
                    Error::InvalidArgument(format!("path is not valid UTF-8: {}", path.display()))
                })?;
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "{} escapes the export directory",
                        path.display()
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidArgument(format!(
                    "{} is outside the export directory {}",
                    path.display(),
                    root.display()
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} does not name a file inside the export directory",
            path.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Remove `.` and resolve `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
