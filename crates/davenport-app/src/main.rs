//! Davenport gateway binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Build the retrieval backend client and chat orchestrator
//! 3. Open the feedback database and voice memo directory
//! 4. Serve the HTTP API until Ctrl-C

mod cli;

use std::sync::Arc;

use clap::Parser;

use davenport_api::routes;
use davenport_api::state::AppState;
use davenport_chat::{ChatOrchestrator, HttpBackend};
use davenport_core::config::GatewayConfig;
use davenport_storage::Database;

use cli::{expand_home, CliArgs};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = GatewayConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Davenport gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");
    config.validate()?;

    // Backend + orchestrator.
    let backend = Arc::new(HttpBackend::from_env(&config.backend)?);
    let orchestrator = ChatOrchestrator::from_config(backend, &config)?;
    tracing::info!(
        default_profile = %config.router.default_profile,
        profiles = config.router.profiles.len(),
        "Chat orchestrator ready"
    );

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("gateway.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let state = AppState::new(config, orchestrator, db, data_dir.join("voice-memos"))?;

    routes::start_server(state, shutdown_signal()).await?;
    Ok(())
}
