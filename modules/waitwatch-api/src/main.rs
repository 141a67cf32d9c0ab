use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use waitwatch_api::{build_router, AppState};
use waitwatch_common::{init_tracing, load_config, AppConfig, FileConfig};
use waitwatch_sync::{ChannelBroadcaster, Services};

/// Pending push events per subscriber before the slowest starts losing them.
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "waitwatch-api", about = "Facility query and push API")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/waitwatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let app_config = AppConfig::from_env()?;
    let file_config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
        FileConfig::default()
    };

    let events = ChannelBroadcaster::new(EVENT_BUFFER);
    let services = Services::from_config(&app_config, file_config, Arc::new(events.clone())).await?;

    let app = build_router(Arc::new(AppState { services, events }));

    let addr = format!("{}:{}", app_config.api_host, app_config.api_port);
    info!("waitwatch API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
