mod daemon;
mod memory_cmds;
mod state_cmds;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use synaptic_config::AppConfig;
use synaptic_memory::{CompressedRecordStore, MemoryType, SystemClock};
use synaptic_runtime::{NoNeuralState, SnapshotManager, StoreBackedMemory};

const DEFAULT_CONFIG_PATH: &str = "config/synaptic.toml";

#[derive(Debug, Parser)]
#[command(
    name = "synaptic",
    version,
    about = "Durable memory store with sleep/wake snapshots, checkpoints and recovery"
)]
struct Cli {
    /// Configuration file; missing means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override both data directories with `<DIR>/longterm` and `<DIR>/state`.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store a long-term memory record.
    Store {
        content: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "type", value_enum, default_value = "long-term")]
        memory_type: CliMemoryType,
        #[arg(long, default_value_t = 0.5)]
        importance: f32,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Context entries as key=value (bools, integers and floats are typed).
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
        #[arg(long = "assoc", value_name = "ID")]
        associations: Vec<String>,
    },
    /// Print a record as JSON.
    Get { id: String },
    /// Search records by text, type, time range and importance.
    Search {
        terms: Vec<String>,
        #[arg(long = "type", value_enum)]
        types: Vec<CliMemoryType>,
        /// RFC 3339 lower bound (inclusive).
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 upper bound (inclusive).
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        min_importance: Option<f32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Rank records by how many context criteria they satisfy.
    Context {
        #[arg(value_name = "KEY=VALUE", required = true)]
        criteria: Vec<String>,
    },
    /// Records linked to an anchor record (the anchor included).
    Associated { id: String },
    /// Add associations to an existing record.
    Link {
        id: String,
        #[arg(required = true)]
        targets: Vec<String>,
    },
    Delete { id: String },
    /// Storage statistics.
    Stats,
    /// Compact aged records and purge corrupt files.
    Optimize,
    /// Re-derive the index from record files.
    RebuildIndex,
    /// Write the canonical state file and enter sleep.
    Sleep,
    /// Reload the canonical state file and wake.
    Wake,
    /// Show the sleep status.
    Status {
        /// Toggle the auto-sleep flag before printing.
        #[arg(long, value_name = "BOOL")]
        auto_sleep: Option<bool>,
    },
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Check a state artifact (default: the canonical state file).
    Validate { path: Option<PathBuf> },
    /// Restore the newest checkpoint or backup that validates.
    Recover,
    /// Run automatic backups until interrupted.
    Daemon,
}

#[derive(Debug, Subcommand)]
enum CheckpointCommands {
    Create { name: Option<String> },
    List,
    Restore { id: String },
    /// Delete all but the newest checkpoints.
    Cleanup {
        /// Defaults to `state.max_checkpoints`.
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommands {
    Create { name: Option<String> },
    List,
    Restore { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliMemoryType {
    ShortTerm,
    LongTerm,
    Working,
    Episodic,
}

impl From<CliMemoryType> for MemoryType {
    fn from(value: CliMemoryType) -> Self {
        match value {
            CliMemoryType::ShortTerm => MemoryType::ShortTerm,
            CliMemoryType::LongTerm => MemoryType::LongTerm,
            CliMemoryType::Working => MemoryType::Working,
            CliMemoryType::Episodic => MemoryType::Episodic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(root) = &cli.data_dir {
        config = config.with_data_root(root);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = open_store(&config).await?;

    match cli.command {
        Commands::Store {
            content,
            id,
            memory_type,
            importance,
            tags,
            context,
            associations,
        } => {
            let request = memory_cmds::StoreRequest {
                content,
                id,
                memory_type: memory_type.into(),
                importance,
                tags,
                context,
                associations,
            };
            memory_cmds::run_store(&store, request).await?;
        }
        Commands::Get { id } => memory_cmds::run_get(&store, &id).await?,
        Commands::Search {
            terms,
            types,
            since,
            until,
            min_importance,
            limit,
        } => {
            let query = memory_cmds::build_query(
                terms,
                types.into_iter().map(Into::into),
                since.as_deref(),
                until.as_deref(),
                min_importance,
                limit,
            )?;
            memory_cmds::run_search(&store, &query).await;
        }
        Commands::Context { criteria } => memory_cmds::run_context(&store, &criteria).await?,
        Commands::Associated { id } => memory_cmds::run_associated(&store, &id).await,
        Commands::Link { id, targets } => memory_cmds::run_link(&store, &id, targets).await?,
        Commands::Delete { id } => memory_cmds::run_delete(&store, &id).await?,
        Commands::Stats => memory_cmds::run_stats(&store).await?,
        Commands::Optimize => memory_cmds::run_optimize(&store).await?,
        Commands::RebuildIndex => memory_cmds::run_rebuild_index(&store).await?,
        Commands::Sleep => state_cmds::run_sleep(&*open_manager(&config, &store).await?).await?,
        Commands::Wake => state_cmds::run_wake(&*open_manager(&config, &store).await?).await?,
        Commands::Status { auto_sleep } => {
            let manager = open_manager(&config, &store).await?;
            state_cmds::run_status(&manager, auto_sleep).await?;
        }
        Commands::Checkpoint { command } => {
            let manager = open_manager(&config, &store).await?;
            match command {
                CheckpointCommands::Create { name } => {
                    state_cmds::run_checkpoint_create(&manager, name.as_deref()).await?
                }
                CheckpointCommands::List => state_cmds::run_checkpoint_list(&manager).await?,
                CheckpointCommands::Restore { id } => {
                    state_cmds::run_checkpoint_restore(&manager, &id).await?
                }
                CheckpointCommands::Cleanup { keep } => {
                    let keep = keep.unwrap_or(config.state.max_checkpoints);
                    state_cmds::run_checkpoint_cleanup(&manager, keep).await?
                }
            }
        }
        Commands::Backup { command } => {
            let manager = open_manager(&config, &store).await?;
            match command {
                BackupCommands::Create { name } => {
                    state_cmds::run_backup_create(&manager, name.as_deref()).await?
                }
                BackupCommands::List => state_cmds::run_backup_list(&manager).await?,
                BackupCommands::Restore { id } => {
                    state_cmds::run_backup_restore(&manager, &id).await?
                }
            }
        }
        Commands::Validate { path } => {
            let manager = open_manager(&config, &store).await?;
            state_cmds::run_validate(&manager, path.as_deref()).await?;
        }
        Commands::Recover => state_cmds::run_recover(&*open_manager(&config, &store).await?).await?,
        Commands::Daemon => {
            let manager = open_manager(&config, &store).await?;
            daemon::run_daemon(&config, store, manager).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<Arc<CompressedRecordStore>> {
    let store = CompressedRecordStore::open(&config.storage, Arc::new(SystemClock))
        .await
        .with_context(|| {
            format!(
                "failed to open record store at {}",
                config.storage.directory.display()
            )
        })?;
    Ok(Arc::new(store))
}

async fn open_manager(
    config: &AppConfig,
    store: &Arc<CompressedRecordStore>,
) -> Result<Arc<SnapshotManager>> {
    let memory = Arc::new(StoreBackedMemory::new(store.clone()));
    let manager = SnapshotManager::open(
        &config.state,
        memory,
        Arc::new(NoNeuralState),
        Arc::new(SystemClock),
    )
    .await
    .with_context(|| format!("failed to open state directory {}", config.state.directory.display()))?;
    Ok(Arc::new(manager))
}
