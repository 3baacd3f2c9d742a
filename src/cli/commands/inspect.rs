//! Read-only inspection commands.

use super::{open_store, print_json};
use crate::cli::StoreArgs;
use crate::error::{Error, Result};
use crate::path;
use crate::storage::maintenance::save_config_to_file;
use colored::Colorize;
use std::path::Path;

/// Show the command line of the most recent export run.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_last_run(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let run = store.last_run()?;

    if json {
        return print_json(&run);
    }
    match run {
        Some(run) => {
            println!("{} {}", run.datetime.dimmed(), run.cwd.dimmed());
            println!("{} {}", run.tool_path, run.args.join(" "));
        }
        None => println!("No runs recorded."),
    }
    Ok(())
}

/// Write the last saved run configuration to `dest`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the store holds no configuration, or an I/O
/// error if the file cannot be written.
pub fn execute_save_config(args: &StoreArgs, dest: &Path, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    if dry_run {
        let available = store.last_run_config()?.is_some();
        if json {
            return print_json(&serde_json::json!({ "file": dest.display().to_string(), "available": available, "dry_run": true }));
        }
        if available {
            println!("Would save last run configuration to {}", dest.display());
        } else {
            println!("No saved run configuration.");
        }
        return Ok(());
    }

    if !save_config_to_file(&store, dest)? {
        return Err(Error::Config(format!(
            "{} holds no saved run configuration",
            store.path().display()
        )));
    }
    if json {
        return print_json(&serde_json::json!({ "file": dest.display().to_string() }));
    }
    println!("{} Saved last run configuration to {}", "✓".green(), dest.display());
    Ok(())
}

/// Run a read-only statement and print its rows.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for a statement that writes, or a
/// database error.
pub fn execute_sql(args: &StoreArgs, statement: &str, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let result = store.query(statement)?;

    if json {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = result
            .rows
            .iter()
            .map(|row| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().map(serde_json::Value::String))
                    .collect()
            })
            .collect();
        return print_json(&rows);
    }
    println!("{}", result.columns.join("\t").bold());
    for row in &result.rows {
        println!("{}", row.join("\t"));
    }
    Ok(())
}

/// Print the full record of one exported file.
///
/// # Errors
///
/// Returns [`Error::RecordNotFound`] if the store has no record for `target`.
pub fn execute_info(args: &StoreArgs, target: &Path, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let record = store
        .file_record(target)?
        .ok_or_else(|| Error::RecordNotFound {
            path: target.display().to_string(),
        })?;

    if json {
        return print_json(&record);
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// List the exported files of an asset.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_asset_files(args: &StoreArgs, asset_id: &str, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let files: Vec<String> = store
        .get_paths_for_asset(asset_id)?
        .iter()
        .map(|rel| path::absolute(store.export_root(), rel).display().to_string())
        .collect();

    if json {
        return print_json(&files);
    }
    for file in &files {
        println!("{file}");
    }
    Ok(())
}

/// Print the cached metadata blob of an asset.
///
/// # Errors
///
/// Returns [`Error::AssetNotFound`] if no blob is cached for `asset_id`.
pub fn execute_asset_info(args: &StoreArgs, asset_id: &str, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let blob = store
        .get_metadata_blob_for_asset(asset_id)?
        .ok_or_else(|| Error::AssetNotFound {
            asset_id: asset_id.to_string(),
        })?;

    // Blobs are usually JSON; print anything else verbatim.
    match serde_json::from_str::<serde_json::Value>(&blob) {
        Ok(value) if json => print_json(&value),
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(_) if json => print_json(&blob),
        Err(_) => {
            println!("{blob}");
            Ok(())
        }
    }
}

/// List records that carry an error from their last export.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn execute_errors(args: &StoreArgs, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let entries = store.records_with_errors()?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No errors recorded.");
        return Ok(());
    }
    for entry in &entries {
        let kind = entry.error.kind.as_deref().map(|k| format!("[{k}] ")).unwrap_or_default();
        println!(
            "{} {}: {}{}",
            entry.timestamp.as_deref().unwrap_or("-").dimmed(),
            entry.path,
            kind.yellow(),
            entry.error.message
        );
    }
    println!("{} records with errors", entries.len());
    Ok(())
}

/// Print the results snapshot from `runs_ago` runs back.
///
/// # Errors
///
/// Returns a serialization error if the snapshot has an unknown format.
pub fn execute_report(args: &StoreArgs, runs_ago: usize, dry_run: bool, json: bool) -> Result<()> {
    let store = open_store(args, dry_run)?;
    let results = store.get_run_result_value(runs_ago)?;

    if json {
        return print_json(&results);
    }
    match results {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("No results recorded {runs_ago} runs ago."),
    }
    Ok(())
}
