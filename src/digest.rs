//! Content digests and option fingerprints.
//!
//! A digest is an opaque token distinct from a [`crate::signature::FileSignature`]:
//! it captures exporter-visible metadata (keywords, titles, sidecar inputs) so a
//! metadata-only change can be detected even when the output bytes are equal.
//! Values are serialized to canonical JSON (object keys sorted) and hashed with
//! SHA-256.

use crate::error::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

fn canonical_json<T: Serialize>(what: &str, value: &T) -> Result<String> {
    // `Value` keeps object keys in a BTreeMap, which sorts them.
    let value = serde_json::to_value(value).map_err(|e| Error::serialization(what, e))?;
    serde_json::to_string(&value).map_err(|e| Error::serialization(what, e))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of the metadata that went into an exported file.
///
/// # Errors
///
/// Returns a serialization error if `value` cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn compute_digest<T: Serialize>(value: &T) -> Result<String> {
    canonical_json("digest input", value).map(|json| sha256_hex(json.as_bytes()))
}

/// Fingerprint of the export options a file was written with.
///
/// # Errors
///
/// Returns a serialization error if `options` cannot be represented as JSON.
pub fn options_fingerprint<T: Serialize>(options: &T) -> Result<String> {
    canonical_json("export options", options).map(|json| sha256_hex(json.as_bytes()))
}

/// Returns `true` if there is no stored digest or it differs from `current`.
#[must_use]
pub fn has_changed(current: &str, stored: Option<&str>) -> bool {
    stored.is_none_or(|s| s != current)
}
