//! Maintenance passes over every exported file.
//!
//! These back the inspection commands: verifying recorded destination
//! signatures against the filesystem, force-refreshing them, and touching
//! files to a reference time. Filesystem queries go through a
//! [`DirectoryStatCache`] so each output directory is listed once.

use super::record::RecordError;
use super::store::ExportStateStore;
use crate::error::Result;
use crate::path;
use crate::signature::secs_to_system_time;
use crate::stat_cache::DirectoryStatCache;

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of [`check_signatures`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCheck {
    pub matched: Vec<String>,
    pub mismatched: Vec<String>,
    /// Recorded files missing from disk.
    pub skipped: Vec<String>,
}

/// Outcome of [`update_signatures`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureUpdate {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

/// Outcome of [`touch_files`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TouchReport {
    pub touched: Vec<String>,
    pub up_to_date: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Compare each recorded destination signature with the file on disk.
///
/// # Errors
///
/// Returns a store error; per-file problems are reported in the result.
pub fn check_signatures(store: &ExportStateStore, cache: &DirectoryStatCache) -> Result<SignatureCheck> {
    let mut report = SignatureCheck::default();
    for (_, rel) in store.iterate_exported_files()? {
        let abs = path::absolute(store.export_root(), &rel);
        let Some(actual) = cache.is_file(&abs).then(|| cache.file_signature(&abs)).flatten() else {
            report.skipped.push(rel);
            continue;
        };
        let recorded = store
            .get_record(&rel)?
            .map(|rec| rec.destination_signature())
            .transpose()?
            .flatten();
        if recorded.is_some_and(|sig| sig.matches(&actual)) {
            report.matched.push(rel);
        } else {
            debug!(path = %rel, ?recorded, ?actual, "Signature mismatch");
            report.mismatched.push(rel);
        }
    }
    info!(
        matched = report.matched.len(),
        mismatched = report.mismatched.len(),
        skipped = report.skipped.len(),
        "Checked signatures"
    );
    Ok(report)
}

/// Overwrite each recorded destination signature with the file on disk.
///
/// With `dry_run`, nothing is written but the report is the same.
///
/// # Errors
///
/// Returns a store error.
pub fn update_signatures(
    store: &ExportStateStore,
    cache: &DirectoryStatCache,
    dry_run: bool,
) -> Result<SignatureUpdate> {
    let mut report = SignatureUpdate::default();
    for (_, rel) in store.iterate_exported_files()? {
        let abs = path::absolute(store.export_root(), &rel);
        let Some(actual) = cache.is_file(&abs).then(|| cache.file_signature(&abs)).flatten() else {
            report.skipped.push(rel);
            continue;
        };
        if !dry_run {
            if let Some(rec) = store.get_record(&rel)? {
                rec.set_destination_signature(Some(actual))?;
            }
        }
        report.updated.push(rel);
    }
    info!(
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        dry_run,
        "Updated signatures"
    );
    Ok(report)
}

/// Set each exported file's mtime to `reference` (epoch seconds) and record
/// the new signature.
///
/// A file that cannot be touched gets the failure written into its record's
/// error field and is listed under `failed`.
///
/// # Errors
///
/// Returns a store error.
pub fn touch_files(
    store: &ExportStateStore,
    cache: &DirectoryStatCache,
    reference: i64,
    dry_run: bool,
) -> Result<TouchReport> {
    let mut report = TouchReport::default();
    for (_, rel) in store.iterate_exported_files()? {
        let abs = path::absolute(store.export_root(), &rel);
        let Some(actual) = cache.is_file(&abs).then(|| cache.file_signature(&abs)).flatten() else {
            report.skipped.push(rel);
            continue;
        };
        if actual.mtime == reference {
            report.up_to_date.push(rel);
            continue;
        }
        if dry_run {
            report.touched.push(rel);
            continue;
        }

        let Some(rec) = store.get_record(&rel)? else {
            continue;
        };
        match set_mtime(&abs, reference) {
            Ok(()) => {
                cache.update_file(&abs, Some(reference));
                rec.transaction(|txn| {
                    txn.set_destination_signature(Some(actual.with_mtime(reference)))?;
                    txn.set_last_error(None)
                })?;
                report.touched.push(rel);
            }
            Err(e) => {
                warn!(path = %abs.display(), error = %e, "Could not touch file");
                rec.set_last_error(Some(&RecordError::new(format!("touch failed: {e}")).with_kind("io")))?;
                report.failed.push(rel);
            }
        }
    }
    info!(
        touched = report.touched.len(),
        up_to_date = report.up_to_date.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        dry_run,
        "Touched files"
    );
    Ok(report)
}

fn set_mtime(path: &Path, secs: i64) -> std::io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(secs_to_system_time(secs))
}

/// Write the newest saved run configuration to `dest`.
///
/// Returns `false` if the store has no saved configuration. The file is
/// written to a temporary sibling, synced, and renamed into place.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written, or a store error.
pub fn save_config_to_file(store: &ExportStateStore, dest: &Path) -> Result<bool> {
    let Some(snapshot) = store.last_run_config()? else {
        return Ok(false);
    };
    atomic_write(dest, &snapshot.config)?;
    Ok(true)
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&temp_path, path)
}
