//! Store maintenance commands: migrate, vacuum, backup, signature passes
//! and touch.

use super::{open_store, print_json};
use crate::cli::StoreArgs;
use crate::error::{Error, Result};
use crate::stat_cache::DirectoryStatCache;
use crate::storage::maintenance::{check_signatures, touch_files, update_signatures};
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct MigrateOutput {
    path: String,
    from: Option<String>,
    to: String,
    migrated: bool,
    dry_run: bool,
}

/// Bring the store to the current schema version.
///
/// Opening already migrates; this reports what happened.
///
/// # Errors
///
/// Returns an error if the store is missing or a migration fails.
pub fn execute_migrate(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let path = store.path().display().to_string();
    let upgrade = store.upgrade().map(|(from, to)| (from.to_string(), to.to_string()));

    if json {
        return print_json(&MigrateOutput {
            path,
            migrated: upgrade.is_some(),
            from: upgrade.as_ref().map(|(from, _)| from.clone()),
            to: CURRENT_SCHEMA_VERSION.to_string(),
            dry_run,
        });
    }

    match upgrade {
        Some((from, to)) if dry_run => {
            println!("Would migrate export database {path} from version {from} to {to}");
        }
        Some((from, to)) => {
            println!(
                "{} Migrated export database {path} from version {from} to {to}",
                "✓".green()
            );
        }
        None => {
            println!("Export database {path} is already at latest version {CURRENT_SCHEMA_VERSION}");
        }
    }
    Ok(())
}

/// Compact the store file.
///
/// # Errors
///
/// Returns an error if the store is missing or VACUUM fails.
pub fn execute_vacuum(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let before = file_size(store.path());
    if !dry_run {
        store.vacuum()?;
    }
    let after = file_size(store.path());

    if json {
        return print_json(&serde_json::json!({
            "path": store.path().display().to_string(),
            "size_before": before,
            "size_after": after,
            "dry_run": dry_run,
        }));
    }
    if dry_run {
        println!("Would vacuum {} ({before} bytes)", store.path().display());
    } else {
        println!(
            "{} Vacuumed {}: {before} -> {after} bytes",
            "✓".green(),
            store.path().display()
        );
    }
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Copy the store to a datestamped backup next to it.
///
/// # Errors
///
/// Returns an error if the store is missing or a copy fails.
pub fn execute_backup(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    if dry_run {
        if json {
            return print_json(&serde_json::json!({ "path": store.path().display().to_string(), "dry_run": true }));
        }
        println!("Would back up {}", store.path().display());
        return Ok(());
    }

    let backup = store.backup()?;
    if json {
        return print_json(&serde_json::json!({
            "path": store.path().display().to_string(),
            "backup": backup.display().to_string(),
        }));
    }
    println!("{} Backed up {} to {}", "✓".green(), store.path().display(), backup.display());
    Ok(())
}

/// Report files whose recorded destination signature no longer matches.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_check_signatures(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let report = check_signatures(&store, &DirectoryStatCache::default())?;

    if json {
        return print_json(&report);
    }
    for path in &report.mismatched {
        println!("{} {path}", "✗".red());
    }
    for path in &report.skipped {
        println!("{} {path}", "missing".dimmed());
    }
    println!(
        "Checked {} files: {} matched, {} mismatched, {} missing",
        report.matched.len() + report.mismatched.len() + report.skipped.len(),
        report.matched.len().to_string().green(),
        report.mismatched.len().to_string().red(),
        report.skipped.len()
    );
    Ok(())
}

/// Overwrite recorded destination signatures with the files on disk.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_update_signatures(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let report = update_signatures(&store, &DirectoryStatCache::default(), dry_run)?;

    if json {
        return print_json(&report);
    }
    let verb = if dry_run { "Would update" } else { "Updated" };
    println!(
        "{verb} {} signatures ({} files missing)",
        report.updated.len(),
        report.skipped.len()
    );
    Ok(())
}

/// Set every exported file's mtime to `date` and record the new signatures.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an unparseable date, or a store error.
pub fn execute_touch(args: &StoreArgs, date: &str, dry_run: bool, json: bool) -> Result<()> {
    let reference = parse_reference_date(date)?;
    let store = open_store(args, dry_run)?;
    let report = touch_files(&store, &DirectoryStatCache::default(), reference.timestamp(), dry_run)?;

    if json {
        return print_json(&report);
    }
    for path in &report.failed {
        println!("{} {path}", "✗".red());
    }
    let verb = if dry_run { "Would touch" } else { "Touched" };
    println!(
        "{verb} {} files to {}: {} already up to date, {} missing, {} failed",
        report.touched.len(),
        reference.to_rfc3339(),
        report.up_to_date.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(())
}

/// Parse a reference date. Dates without an offset are local time.
fn parse_reference_date(input: &str) -> Result<DateTime<Local>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| Error::InvalidArgument(format!("cannot parse date: {input}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| Error::InvalidArgument(format!("date does not exist in local time: {input}")))
}
