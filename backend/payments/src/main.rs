//! Donation payments service: entry point.
//!
//! Serves the PayPal order/capture/webhook endpoints and the public campaign
//! progress listing, backed by SQLite. A background sweeper fails donations
//! that never obtained a PayPal order.

mod api;
mod config;
mod db;
mod errors;
mod events;
mod models;
mod orders;
mod paypal;
mod sweeper;
mod validation;
mod webhook;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use db::Datastore;
use paypal::PayPalClient;
use sweeper::SweeperConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        "PayPal environment: {:?} ({})",
        config.paypal.environment,
        config.paypal.api_base()
    );

    // The pool is opened on first use so the API still starts without
    // DATABASE_URL and reports a configuration error per request.
    let datastore = Datastore::new(config.database_url.clone());

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let state = Arc::new(api::ApiState {
        datastore,
        paypal: PayPalClient::new(client, config.paypal.clone()),
    });

    // ─── Background sweeper ───────────────────────────────
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweeper::run(
        state.clone(),
        SweeperConfig {
            interval_secs: config.sweep_interval_secs,
            pending_ttl_secs: config.pending_ttl_secs,
        },
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    sweeper.await?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    shutdown.cancel();
}
