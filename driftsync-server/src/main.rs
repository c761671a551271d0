//! DriftSync Server
//!
//! A self-hostable content-sync hub: devices authenticate with rotating
//! token pairs, push clipboard/link/file/note events over REST or a
//! WebSocket, and the server fans each event out to the user's other
//! connected devices in real time.

mod auth;
mod cache;
mod cleanup;
mod config;
mod email;
mod engine;
mod error;
mod events;
mod gateway;
mod handlers;
mod password;
mod rate_limit;
mod server;
mod sessions;
mod state;
mod storage;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftsync-server", about = "DriftSync content-sync server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "driftsync.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::ServerConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }
    cfg.validate()?;

    tracing::info!("Starting DriftSync server on {}", cfg.listen_addr);

    let storage = storage::Storage::open(&cfg.storage_path)?;
    let state = state::AppState::new(cfg.clone(), storage);
    cleanup::spawn_cleanup_task(state.clone());

    let app = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
