//! xref CLI - inspect and exercise the sync state of a device.
//!
//! This is the entry point for the `xref` binary.

mod commands;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xref_store::RocksStore;
use xref_sync::{ApplyPipeline, ModelRegistry, SyncConfig};

use commands::TableExport;

/// xref CLI - inspect and exercise the sync state of a device.
#[derive(Parser, Debug)]
#[command(name = "xref")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of the device database.
    #[arg(long, env = "XREF_DATA_DIR", default_value = "./xref-data")]
    data_dir: PathBuf,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the model registry and print the sync order.
    Validate,
    /// List records waiting for a dependency.
    Pending,
    /// Drop deferred records whose dependency is overdue.
    EvictStale,
    /// Export stored records in wire form as JSON.
    Export {
        /// Only export this table.
        table: Option<String>,
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Apply a JSON export from another device.
    Import {
        /// Export file to apply.
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so command output stays pipeable
    let default_filter = if args.debug { "info,xref=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let registry = Arc::new(ModelRegistry::standard().context("invalid model registry")?);
    let mut stdout = io::stdout().lock();

    if matches!(args.command, Command::Validate) {
        return commands::validate(&registry, &mut stdout);
    }

    let config = SyncConfig::from_env();
    tracing::info!(
        data_dir = %args.data_dir.display(),
        stale_after_seconds = config.stale_after_seconds,
        max_deferred_records = config.max_deferred_records,
        apply_concurrency = config.apply_concurrency,
        "Opening device database"
    );
    let store = Arc::new(
        RocksStore::open(&args.data_dir)
            .with_context(|| format!("opening {}", args.data_dir.display()))?,
    );
    let pipeline = ApplyPipeline::new(registry, store, config);

    match args.command {
        Command::Validate => {}
        Command::Pending => commands::pending(&pipeline, Utc::now(), &mut stdout)?,
        Command::EvictStale => commands::evict_stale(&pipeline, Utc::now(), &mut stdout).await?,
        Command::Export { table, output } => {
            let tables = commands::export(&pipeline, table.as_deref()).await?;
            let json = serde_json::to_string_pretty(&tables)?;
            match output {
                Some(path) => fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => writeln!(stdout, "{json}")?,
            }
        }
        Command::Import { input } => {
            let json = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let tables: Vec<TableExport> = serde_json::from_str(&json)
                .with_context(|| format!("parsing {}", input.display()))?;
            let summary = commands::import(&pipeline, tables).await?;
            writeln!(
                stdout,
                "Applied {}, released {}, deferred {}, discarded {}, failed {}",
                summary.applied,
                summary.released,
                summary.deferred,
                summary.discarded,
                summary.failed
            )?;
        }
    }

    Ok(())
}
