//! Operator CLI for Bulwark.

use anyhow::{Context, Result};
use bulwark_core::config::AppConfig;
use bulwark_engine::{
    BatchOperation, BatchResult, MutationOrchestrator, RestoreOutcome, StatusPatch,
};
use bulwark_storage::DocumentStore;
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bulwarkctl")]
#[command(about = "Bulk mutation and trash management for Bulwark record stores")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "BULWARK_CONFIG",
        default_value = "config/bulwark.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import alerts from a CSV file
    Import {
        /// CSV file with a header row
        file: PathBuf,
    },
    /// Export alerts as CSV
    Export {
        /// Collection to export
        #[arg(long, default_value = "alerts")]
        collection: String,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Move records to the trash
    Delete {
        /// Collection holding the records
        #[arg(long)]
        collection: String,
        /// Record ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Change status fields on records
    Update {
        /// Collection holding the records
        #[arg(long)]
        collection: String,
        /// New status
        #[arg(long)]
        status: Option<String>,
        /// New verification status
        #[arg(long)]
        verification_status: Option<String>,
        /// Record ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Trash management commands
    Trash {
        #[command(subcommand)]
        command: TrashCommands,
    },
    /// Check the document store
    Health,
}

#[derive(Subcommand)]
enum TrashCommands {
    /// List trash entries
    List,
    /// Restore trash entries to their original collection
    Restore {
        /// Trash entry ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Permanently delete every trash entry
    Empty,
    /// Permanently delete expired trash entries
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so exports can be piped.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();
    let config = load_config(&config)?;

    let store = bulwark_storage::from_config(&config.store)
        .await
        .context("failed to initialize document store")?;
    tracing::debug!(backend = store.backend_name(), "Document store ready");

    let engine = MutationOrchestrator::from_config(store.clone(), &config);

    let shutdown = CancellationToken::new();
    let sweeper = config.trash.auto_sweep_enabled.then(|| {
        engine
            .trash()
            .clone()
            .spawn_sweeper(config.trash.auto_sweep_interval(), shutdown.child_token())
    });

    let outcome = run_command(command, &engine, &store).await;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    outcome
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("BULWARK_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn run_command(
    command: Commands,
    engine: &MutationOrchestrator,
    store: &Arc<dyn DocumentStore>,
) -> Result<()> {
    match command {
        Commands::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let tracked = TrackedOperation::start();
            let outcome = engine.import_csv(&raw, &tracked.op).await;
            tracked.finish().await;
            let outcome = outcome.context("import failed")?;

            for column in &outcome.ignored_columns {
                println!("Ignored column: {column}");
            }
            for warning in &outcome.warnings {
                println!("Warning: {warning}");
            }
            report(&outcome.result)
        }
        Commands::Export { collection, out } => {
            let csv = engine.export_csv(&collection).await?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, csv)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {collection} to {}", path.display());
                }
                None => print!("{csv}"),
            }
            Ok(())
        }
        Commands::Delete { collection, ids } => {
            let tracked = TrackedOperation::start();
            let result = engine.bulk_delete(&collection, &ids, &tracked.op).await;
            tracked.finish().await;
            report(&result?)
        }
        Commands::Update {
            collection,
            status,
            verification_status,
            ids,
        } => {
            let patch = StatusPatch {
                status,
                verification_status,
            };
            let tracked = TrackedOperation::start();
            let result = engine
                .bulk_update(&collection, &ids, &patch, &tracked.op)
                .await;
            tracked.finish().await;
            report(&result?)
        }
        Commands::Trash { command } => run_trash_command(command, engine).await,
        Commands::Health => {
            store
                .health_check()
                .await
                .with_context(|| format!("{} store is unhealthy", store.backend_name()))?;
            let entries = engine.trash().list_trash().await?;
            println!("Store: {} OK", store.backend_name());
            println!("Trash entries: {}", entries.len());
            Ok(())
        }
    }
}

async fn run_trash_command(command: TrashCommands, engine: &MutationOrchestrator) -> Result<()> {
    let trash = engine.trash();
    match command {
        TrashCommands::List => {
            let entries = trash.list_trash().await?;
            if entries.is_empty() {
                println!("Trash is empty");
                return Ok(());
            }
            let now = OffsetDateTime::now_utc();
            for (id, entry) in entries {
                println!(
                    "{id}\t{}\t{}\tdeleted {}\texpires {}{}",
                    entry.original_collection.as_deref().unwrap_or("-"),
                    entry.deleted_by.as_deref().unwrap_or("-"),
                    format_instant(entry.deleted_at),
                    format_instant(entry.expires_at),
                    if entry.is_expired(now) { " (expired)" } else { "" },
                );
            }
            Ok(())
        }
        TrashCommands::Restore { ids } => {
            if let [id] = ids.as_slice() {
                // Single restores report the exact outcome.
                match trash.restore(id, engine.operator()).await? {
                    RestoreOutcome::Restored {
                        collection,
                        restoration_count,
                        ..
                    } => println!(
                        "Restored {id} to {collection} (restored {restoration_count} times)"
                    ),
                    RestoreOutcome::AlreadyRestored { collection, .. } => {
                        println!("{id} already exists in {collection}; removed stale trash entry")
                    }
                    RestoreOutcome::Missing => println!("{id} was already restored or purged"),
                }
                return Ok(());
            }
            let tracked = TrackedOperation::start();
            let result = engine.bulk_restore(&ids, &tracked.op).await;
            tracked.finish().await;
            report(&result?)
        }
        TrashCommands::Empty => {
            let purged = trash.empty_trash().await?;
            println!("Purged {purged} trash entries");
            Ok(())
        }
        TrashCommands::Sweep => {
            let purged = trash.sweep_expired(OffsetDateTime::now_utc()).await?;
            println!("Purged {purged} expired trash entries");
            Ok(())
        }
    }
}

/// A bulk operation with progress printed to stderr and Ctrl-C wired to
/// cancellation.
struct TrackedOperation {
    op: BatchOperation,
    progress: JoinHandle<()>,
    interrupt: JoinHandle<()>,
}

impl TrackedOperation {
    fn start() -> Self {
        let op = BatchOperation::new();

        let mut rx = op.subscribe();
        let progress = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                eprintln!("[{}/{}] {}", state.processed, state.total, state.status);
            }
        });

        let token = op.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted; stopping after the current batch");
                token.cancel();
            }
        });

        Self {
            op,
            progress,
            interrupt,
        }
    }

    async fn finish(self) {
        self.interrupt.abort();
        // Dropping the handle closes the progress channel.
        drop(self.op);
        let _ = self.progress.await;
    }
}

fn report(result: &BatchResult) -> Result<()> {
    println!("{result}");
    if result.is_complete_success() {
        Ok(())
    } else if result.cancelled {
        anyhow::bail!("operation cancelled after {} items", result.processed)
    } else {
        anyhow::bail!("{} items failed", result.failure_count)
    }
}

fn format_instant(instant: Option<OffsetDateTime>) -> String {
    instant
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}
