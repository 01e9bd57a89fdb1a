// SPDX-License-Identifier: PMPL-1.0-or-later
//! virodb: inspect, reconstruct and revert entity history from the shell.
//!
//! Results are printed to stdout as pretty JSON; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use virodb_document::{ChangeId, Entity, VersionTag};
use virodb_engine::{BackendKind, EngineConfig, EngineError, HistoryEngine};
use virodb_storage::{InMemoryBackend, RedbBackend, StorageBackend};
use virodb_temporal::{ChangeMethod, HistoryRecord};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "virodb", version = VERSION, about = "Versioned entity history for ViroDB")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file; implies the redb backend.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recent changes across all entities, or every change of one entity.
    History {
        entity: Option<String>,
        /// Number of recent changes to list.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one history record, including its diff.
    Show { change_id: String },
    /// Print an entity as it was at VERSION (a number or "removed").
    Reconstruct { entity: String, version: String },
    /// Restore an entity to the state CHANGE_ID produced and drop newer history.
    Revert { change_id: String },
    /// Create entities from a JSON array of assembled entities.
    Import {
        file: PathBuf,
        #[arg(long)]
        user: Option<String>,
    },
}

/// One line of a history listing.
#[derive(Debug, Serialize)]
struct HistoryLine {
    id: String,
    entity_name: String,
    method: ChangeMethod,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    timestamp: DateTime<Utc>,
    changes: String,
}

impl From<&HistoryRecord> for HistoryLine {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: record.id.to_string(),
            entity_name: record.entity_name.clone(),
            method: record.method,
            description: record.description.clone(),
            user_id: record.user_id.clone(),
            timestamp: record.timestamp,
            changes: record.diff.summary().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Process exit status for a failed command.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EngineError>().map(EngineError::status_code) {
        Some(400) => 2,
        Some(404) => 3,
        Some(409) => 4,
        _ => 1,
    }
}

/// Config file (or defaults), then environment, then flags.
fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?.overlay(|key| std::env::var(key).ok())?,
        None => EngineConfig::from_env()?,
    };
    if let Some(data) = &cli.data {
        config.backend = BackendKind::Redb;
        config.data_path = data.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match config.backend {
        BackendKind::Memory => {
            warn!("using the memory backend; nothing will be persisted");
            execute(&HistoryEngine::new(InMemoryBackend::new(), &config), cli.command).await
        }
        BackendKind::Redb => {
            let backend = RedbBackend::open(&config.data_path)
                .with_context(|| format!("failed to open {}", config.data_path.display()))?;
            execute(&HistoryEngine::new(backend, &config), cli.command).await
        }
    }
}

async fn execute<B: StorageBackend + Clone>(engine: &HistoryEngine<B>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::History {
            entity: Some(entity_id),
            ..
        } => {
            let records = engine.history_for(&entity_id).await?;
            if records.is_empty() {
                return Err(EngineError::NotFound(format!("no history for '{entity_id}'")).into());
            }
            print_json(&records.iter().map(HistoryLine::from).collect::<Vec<_>>())
        }
        Command::History { entity: None, limit } => {
            let records = engine.find_recent(limit).await?;
            print_json(&records.iter().map(HistoryLine::from).collect::<Vec<_>>())
        }
        Command::Show { change_id } => {
            let id: ChangeId = change_id.parse().map_err(EngineError::from)?;
            print_json(&engine.get_change(&id).await?)
        }
        Command::Reconstruct { entity, version } => {
            let version: VersionTag = version.parse().map_err(EngineError::from)?;
            print_json(&engine.reconstruct(&entity, version).await?)
        }
        Command::Revert { change_id } => {
            let id: ChangeId = change_id.parse().map_err(EngineError::from)?;
            print_json(&engine.revert(&id).await?)
        }
        Command::Import { file, user } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entities: Vec<Entity> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of entities", file.display()))?;

            let mut created = Vec::with_capacity(entities.len());
            for entity in entities {
                let entity = engine.create(entity, user.clone()).await?;
                created.push(format!("{}.0", entity.id));
            }
            info!(count = created.len(), file = %file.display(), "imported entities");
            print_json(&created)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
