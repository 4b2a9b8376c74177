//! Tessera CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Incremental semantic validation for Python repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the repository and write the graph cache
    Index,
    /// Index and validate the whole repository
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Leave warnings out of the report
        #[arg(long)]
        errors_only: bool,
    },
    /// Re-validate on every file change until interrupted
    Watch {
        /// Print each change event as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Capture, list and compare graph snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// List the callers affected by changing a function or class
    Impact {
        /// Qualified name, e.g. `pkg.module.func`
        name: String,

        #[arg(long)]
        json: bool,
    },
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Snapshot the current working tree
    Create {
        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,

        /// Derive the id from the graph content instead of the time
        #[arg(long)]
        content_id: bool,
    },
    /// List stored snapshots
    List,
    /// Compare two snapshots, or one snapshot with the working tree
    Diff {
        old: String,
        new: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Build (or reuse) the snapshot of a git revision
    Commit {
        #[arg(default_value = "HEAD")]
        rev: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tessera={}", log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Repository root: {}", cli.root.display());

    match cli.command {
        Commands::Index => commands::index(&cli.root).map(|_| ExitCode::SUCCESS),
        Commands::Check { json, errors_only } => {
            let clean = commands::check(&cli.root, json, errors_only)?;
            Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Watch { json } => commands::watch(&cli.root, json)
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Snapshot { action } => {
            let outcome = match action {
                SnapshotAction::Create {
                    description,
                    tag,
                    content_id,
                } => commands::snapshot_create(&cli.root, description, tag, content_id),
                SnapshotAction::List => commands::snapshot_list(&cli.root),
                SnapshotAction::Diff { old, new, json } => {
                    commands::snapshot_diff(&cli.root, &old, new.as_deref(), json)
                }
                SnapshotAction::Commit { rev } => commands::snapshot_commit(&cli.root, &rev),
            };
            outcome.map(|_| ExitCode::SUCCESS)
        }
        Commands::Impact { name, json } => {
            commands::impact(&cli.root, &name, json).map(|_| ExitCode::SUCCESS)
        }
        Commands::Clear => commands::clear(&cli.root).map(|_| ExitCode::SUCCESS),
        Commands::Version => {
            println!("Tessera v{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}
