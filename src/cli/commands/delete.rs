//! Commands that forget records.

use super::{open_store, print_json};
use crate::cli::StoreArgs;
use crate::error::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct DeleteOutput {
    target: String,
    deleted: usize,
}

fn report(outputs: &[DeleteOutput], dry_run: bool, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({ "dry_run": dry_run, "deleted": outputs }));
    }
    let verb = if dry_run { "Would delete" } else { "Deleted" };
    for out in outputs {
        if out.deleted == 0 {
            println!("{} {}: no records", "-".dimmed(), out.target);
        } else {
            println!("{} {verb} {} records for {}", "✓".green(), out.deleted, out.target);
        }
    }
    Ok(())
}

/// Delete every record of each asset in `asset_ids`.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_delete_asset(args: &StoreArgs, asset_ids: &[String], dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let outputs = asset_ids
        .iter()
        .map(|id| {
            Ok(DeleteOutput {
                target: id.clone(),
                deleted: store.delete_records_for_asset(id)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    report(&outputs, store.is_dry_run(), json)
}

/// Delete the record of each file in `paths`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidArgument`] for a path outside the export
/// root, or a store error.
pub fn execute_delete_file(args: &StoreArgs, paths: &[PathBuf], dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let outputs = paths
        .iter()
        .map(|p| {
            Ok(DeleteOutput {
                target: p.display().to_string(),
                deleted: store.delete_records_for_path(p)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    report(&outputs, store.is_dry_run(), json)
}
