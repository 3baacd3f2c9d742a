//! Command implementations.
//!
//! Every store command opens the store through [`open_store`]. With
//! `--dry-run` the store is loaded into an [`InMemoryStore`] that is never
//! flushed, so migrations and deletions run for real but are discarded.

pub mod completions;
pub mod delete;
pub mod inspect;
pub mod maintenance;
pub mod version;

use crate::cli::StoreArgs;
use crate::config::{StoreConfig, resolve_store_path};
use crate::error::{Error, Result};
use crate::storage::{ExportStateStore, InMemoryStore};
use std::ops::Deref;

/// A store opened for one command.
#[derive(Debug)]
pub enum OpenStore {
    Durable(ExportStateStore),
    DryRun(InMemoryStore),
}

impl OpenStore {
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }
}

impl Deref for OpenStore {
    type Target = ExportStateStore;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Durable(store) => store,
            Self::DryRun(overlay) => overlay,
        }
    }
}

/// Open the store named by `args`; never creates one.
///
/// # Errors
///
/// Returns [`Error::StoreNotFound`] if there is no store file, or any error
/// raised while opening or migrating it.
pub fn open_store(args: &StoreArgs, dry_run: bool) -> Result<OpenStore> {
    let path = resolve_store_path(Some(args.store.as_path()));
    let mut config = StoreConfig::default().with_record_run(false);
    if let Some(root) = &args.export_dir {
        config = config.with_export_root(root);
    }

    if !dry_run {
        return Ok(OpenStore::Durable(ExportStateStore::open_existing(&path, config)?));
    }
    if !path.is_file() {
        return Err(Error::StoreNotFound { path });
    }
    Ok(OpenStore::DryRun(InMemoryStore::open(&path, config)?))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
