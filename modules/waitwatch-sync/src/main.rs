use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use waitwatch_common::{init_tracing, load_config, AppConfig, FileConfig};
use waitwatch_store::PgFacilityStore;
use waitwatch_sync::{parse_extraction_payload, ChannelBroadcaster, Services};

#[derive(Parser)]
#[command(name = "waitwatch-sync", about = "Canonical facility sync and observation ingestion")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/waitwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one incremental sync pass against the canonical source
    Sync,
    /// Match an extraction payload against stored facilities and apply it
    Ingest {
        /// Source group the payload was extracted from
        #[arg(long)]
        label: String,
        /// File holding the extractor's JSON output
        #[arg(long)]
        file: PathBuf,
    },
    /// Apply pending store migrations and exit
    Migrate,
}

fn file_config(path: &Path) -> Result<FileConfig> {
    if path.exists() {
        let config = load_config(path)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(FileConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let app = AppConfig::from_env()?;

    match cli.command {
        Command::Migrate => {
            let store = PgFacilityStore::connect(&app.database_url)
                .await
                .context("Failed to connect to Postgres")?;
            store.migrate().await.context("Failed to run migrations")?;
            info!("Migrations applied");
        }
        Command::Sync => {
            let services = Services::from_config(
                &app,
                file_config(&cli.config)?,
                Arc::new(ChannelBroadcaster::new(16)),
            )
            .await?;
            let report = services.sync_controller()?.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ingest { label, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read payload {}", file.display()))?;
            let services = Services::from_config(
                &app,
                file_config(&cli.config)?,
                Arc::new(ChannelBroadcaster::new(16)),
            )
            .await?;
            let observations = parse_extraction_payload(&raw, &label);
            let report = services.ingestor.ingest(&label, &observations).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
