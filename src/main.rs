mod app;
mod config;
mod gateway;
mod models;
mod services;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use app::App;
use config::{GatewayConfig, APP_ID};
use gateway::GatewayClient;
use services::{Database, LocalStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = GatewayConfig::from_env().context("Failed to load gateway configuration")?;
    tracing::info!("Starting {} against {}", APP_ID, config.base_url);

    let db_path = config::database_path()?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let store = LocalStore::new(db);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let app = App::new(store, Arc::new(GatewayClient::new(config)), events_tx);

    ui::terminal::run(app, events_rx).await
}
