//! Campaign Ledger: entry point.
//!
//! Serves the campaign and donation REST API, receives payment provider
//! webhooks and, when `PENDING_EXPIRY_SECS` is set, runs a background sweeper
//! that expires donations whose payment never arrived.

mod api;
mod campaign;
mod config;
mod db;
mod donation;
mod errors;
mod events;
mod identity;
mod money;
mod payments;
mod progress;
mod receipts;
mod reconciler;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use payments::HttpPaymentProvider;
use receipts::KeyedDocumentStore;
use reconciler::Reconciler;
use sweeper::SweeperState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client for the payment provider.
    let client = Client::builder()
        .timeout(Duration::from_secs(config.provider_timeout_secs))
        .build()?;
    let provider = HttpPaymentProvider::new(
        client,
        &config.payment_api_url,
        &config.payment_secret_key,
        &config.checkout_success_url,
        &config.checkout_cancel_url,
    );
    let documents = KeyedDocumentStore::new(config.receipt_document_prefix.clone());
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        Arc::new(provider),
        Arc::new(documents),
    ));

    let shutdown = CancellationToken::new();

    // ─── Background sweeper ───────────────────────────────
    let sweeper = if config.pending_expiry_secs > 0 {
        let state = Arc::new(SweeperState {
            pool: pool.clone(),
            expiry_secs: config.pending_expiry_secs,
            interval_secs: config.sweep_interval_secs,
        });
        Some(tokio::spawn(sweeper::run(state, shutdown.clone())))
    } else {
        info!("Pending donation sweeper disabled");
        None
    };

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool,
        reconciler,
        webhook_secret: config.webhook_secret.clone(),
        webhook_tolerance_secs: config.webhook_tolerance_secs,
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}
