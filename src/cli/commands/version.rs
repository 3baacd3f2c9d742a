//! Version command implementation.

use super::open_store;
use crate::cli::StoreArgs;
use crate::error::Result;
use crate::storage::schema::{CURRENT_SCHEMA_VERSION, TOOL_VERSION};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    schema_version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<StoreVersion>,
}

#[derive(Serialize)]
struct StoreVersion {
    path: String,
    tool_version: String,
    schema_version: String,
}

/// Execute the version command.
///
/// With a store, also reports the versions recorded in it. Opening the
/// store upgrades it to the current schema first, as every command does;
/// with `dry_run` the upgrade happens on an in-memory copy.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or JSON serialization fails.
pub fn execute(store: Option<&Path>, dry_run: bool, json: bool) -> Result<()> {
    let store = store
        .map(|p| -> Result<StoreVersion> {
            let opened = open_store(
                &StoreArgs {
                    store: p.to_path_buf(),
                    export_dir: None,
                },
                dry_run,
            )?;
            let (tool_version, schema_version) = opened.version_info()?;
            Ok(StoreVersion {
                path: opened.path().display().to_string(),
                tool_version,
                schema_version,
            })
        })
        .transpose()?;

    if json {
        let output = VersionOutput {
            version: TOOL_VERSION,
            schema_version: CURRENT_SCHEMA_VERSION,
            store,
        };
        let payload = serde_json::to_string(&output)?;
        println!("{payload}");
        return Ok(());
    }

    println!("exportdb version {TOOL_VERSION} (schema {CURRENT_SCHEMA_VERSION})");
    if let Some(store) = store {
        println!(
            "{}: written by {}, schema {}",
            store.path, store.tool_version, store.schema_version
        );
    }
    Ok(())
}
