//! exportdb CLI entry point.

use clap::Parser;
use exportdb::cli::commands::{completions, delete, inspect, maintenance, version};
use exportdb::cli::{Cli, Commands};
use exportdb::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli) -> Result<(), Error> {
    let (json, dry_run) = (cli.json, cli.dry_run);
    match &cli.command {
        Commands::Version { store } => version::execute(store.as_deref(), dry_run, json),

        // Maintenance
        Commands::Migrate(args) => maintenance::execute_migrate(args, dry_run, json),
        Commands::Vacuum(args) => maintenance::execute_vacuum(args, dry_run, json),
        Commands::Backup(args) => maintenance::execute_backup(args, dry_run, json),
        Commands::CheckSignatures(args) => maintenance::execute_check_signatures(args, dry_run, json),
        Commands::UpdateSignatures(args) => maintenance::execute_update_signatures(args, dry_run, json),
        Commands::Touch { store, date } => maintenance::execute_touch(store, date, dry_run, json),

        // Inspection
        Commands::LastRun(args) => inspect::execute_last_run(args, dry_run, json),
        Commands::SaveConfig { store, file } => inspect::execute_save_config(store, file, dry_run, json),
        Commands::Sql { store, statement } => inspect::execute_sql(store, statement, dry_run, json),
        Commands::Info { store, path } => inspect::execute_info(store, path, dry_run, json),
        Commands::AssetFiles { store, asset_id } => inspect::execute_asset_files(store, asset_id, dry_run, json),
        Commands::AssetInfo { store, asset_id } => inspect::execute_asset_info(store, asset_id, dry_run, json),
        Commands::Errors(args) => inspect::execute_errors(args, dry_run, json),
        Commands::Report { store, runs_ago } => inspect::execute_report(store, *runs_ago, dry_run, json),

        // Deletion
        Commands::DeleteAsset { store, asset_ids } => delete::execute_delete_asset(store, asset_ids, dry_run, json),
        Commands::DeleteFile { store, paths } => delete::execute_delete_file(store, paths, dry_run, json),

        // Shell completions
        Commands::Completions { shell } => completions::execute(shell),
    }
}
