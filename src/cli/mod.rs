//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Inspect and maintain an incremental export state store
#[derive(Parser, Debug)]
#[command(name = "exportdb", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Preview changes without writing to the store or the export tree
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Arguments shared by every command that works on a store file.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Export state store, or the export directory containing it
    #[arg(value_name = "STORE", env = "EXPORTDB_STORE")]
    pub store: PathBuf,

    /// Export root (default: the store file's directory)
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print tool and schema versions, and the versions recorded in STORE
    Version {
        /// Export state store to inspect
        #[arg(value_name = "STORE")]
        store: Option<PathBuf>,
    },

    /// Compact the store file
    Vacuum(StoreArgs),

    /// Verify recorded destination signatures against the export tree
    CheckSignatures(StoreArgs),

    /// Overwrite recorded destination signatures with the files on disk
    UpdateSignatures(StoreArgs),

    /// Set every exported file's modification time to DATE
    Touch {
        #[command(flatten)]
        store: StoreArgs,

        /// Reference date (RFC 3339, YYYY-MM-DD, or "YYYY-MM-DD HH:MM:SS" local time)
        #[arg(long)]
        date: String,
    },

    /// Show the command line of the most recent export run
    LastRun(StoreArgs),

    /// Write the last saved run configuration to FILE
    SaveConfig {
        #[command(flatten)]
        store: StoreArgs,

        /// Destination file
        file: PathBuf,
    },

    /// Run a read-only SQL statement and print the rows
    Sql {
        #[command(flatten)]
        store: StoreArgs,

        /// SQL statement
        statement: String,
    },

    /// Upgrade the store to the current schema version
    Migrate(StoreArgs),

    /// Show the record for an exported file
    Info {
        #[command(flatten)]
        store: StoreArgs,

        /// Exported file, relative to the export root or absolute
        path: PathBuf,
    },

    /// List the exported files of an asset
    AssetFiles {
        #[command(flatten)]
        store: StoreArgs,

        /// Asset identifier
        asset_id: String,
    },

    /// Show the cached metadata blob of an asset
    AssetInfo {
        #[command(flatten)]
        store: StoreArgs,

        /// Asset identifier
        asset_id: String,
    },

    /// Forget every record of one or more assets
    DeleteAsset {
        #[command(flatten)]
        store: StoreArgs,

        /// Asset identifiers
        #[arg(required = true)]
        asset_ids: Vec<String>,
    },

    /// Forget the records of one or more exported files
    DeleteFile {
        #[command(flatten)]
        store: StoreArgs,

        /// Exported files, relative to the export root or absolute
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List records carrying a per-file error
    Errors(StoreArgs),

    /// Print the results of a previous run
    Report {
        #[command(flatten)]
        store: StoreArgs,

        /// How many runs back (0 is the most recent)
        #[arg(long, default_value_t = 0)]
        runs_ago: usize,
    },

    /// Copy the store to a datestamped backup file
    Backup(StoreArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_store_args_and_globals() {
        let cli = Cli::try_parse_from([
            "exportdb",
            "-vv",
            "--dry-run",
            "delete-file",
            "/export",
            "a.jpg",
            "b.jpg",
            "--export-dir",
            "/elsewhere",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.dry_run);
        let Commands::DeleteFile { store, paths } = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(store.store, PathBuf::from("/export"));
        assert_eq!(store.export_dir, Some(PathBuf::from("/elsewhere")));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_delete_asset_requires_an_id() {
        assert!(Cli::try_parse_from(["exportdb", "delete-asset", "/export/.export_state.db"]).is_err());
    }

    #[test]
    fn test_report_runs_ago_default() {
        let cli = Cli::try_parse_from(["exportdb", "report", "store.db"]).unwrap();
        assert!(matches!(cli.command, Commands::Report { runs_ago: 0, .. }));
    }
}
