//! Cruise - Quota-Aware Proxy Daemon
//!
//! A pure Rust HTTP proxy that:
//! - Fronts the Messages API on /v1/messages, metering every request
//! - Learns quota ceilings from observed 429s and reroutes before the next one
//! - Serves aggregated usage and prediction numbers on /stats
//!
//! Access via: http://localhost:4141

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;
use cruise_core::{
    AppState, LimitLearner, PredictionEngine, ProxyServer, RequestRouter, UsageLedger,
};
use cruise_types::RouterConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Cruise starting on port {}...", cli.port);

    let config = RouterConfig::from_env();
    let primary_has_key =
        config.primary().map(|p| p.api_key.is_some()).unwrap_or(false);
    if !primary_has_key {
        anyhow::bail!("ANTHROPIC_API_KEY is not set; the primary provider cannot be reached");
    }
    for provider in &config.providers {
        if provider.enabled {
            info!("Provider enabled: {} ({})", provider.name, provider.kind);
        }
    }

    let db_path = cruise_core::paths::get_usage_db_path()
        .context("Failed to resolve the usage database path")?;
    let project_path = std::env::current_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();

    let ledger = Arc::new(
        UsageLedger::open(&db_path, project_path)
            .await
            .context("Failed to open the usage ledger")?,
    );
    info!("📊 Usage ledger at {}", db_path.display());

    match ledger.cleanup(cli.retention_days).await {
        Ok(0) => {}
        Ok(deleted) => info!("🧹 Dropped {} usage log(s) past retention", deleted),
        Err(err) => tracing::warn!("Retention cleanup failed: {}", err),
    }

    let learner = Arc::new(
        LimitLearner::load(ledger.clone())
            .await
            .context("Failed to load learned limits")?,
    );
    let prediction = Arc::new(PredictionEngine::new(ledger.clone(), learner));
    let router = Arc::new(RequestRouter::new(config));

    let state = AppState::new(ledger.clone(), prediction, router, cli.static_dir.clone());
    let server = ProxyServer::new(cli.host.clone(), cli.port, state);

    info!("📈 Stats at http://{}:{}/stats", cli.host, cli.port);
    server.run().await?;

    ledger.close().await.context("Failed to close the usage ledger")?;
    info!("Session closed, goodbye");

    Ok(())
}
