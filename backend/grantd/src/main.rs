//! grantd: micro-grant coordinator backend.
//!
//! Keeps projects, users and contributions in SQLite, drives the on-chain
//! proposal lifecycle through `GrantManager`, and signs contribution weights
//! for `castVote`. An optional background task keeps project status in line
//! with the chain.

mod api;
mod auth;
mod chain;
mod config;
mod db;
mod errors;
mod faucet;
mod ipfs;
mod ledger;
mod lifecycle;
mod models;
mod signer;
mod stats;
mod sync;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain::EthersChain;
use config::Config;
use ipfs::PinataClient;
use signer::CredentialSigner;

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
    let promoted = db::promote_admins(&pool, &config.admin_addresses).await?;
    if promoted > 0 {
        info!("Granted admin to {promoted} wallet(s)");
    }

    let signer = CredentialSigner::from_private_key(&config.admin_private_key)?;
    info!("Trusted signer: {:?}", signer.address());

    let chain: Arc<dyn chain::GrantChain> =
        Arc::new(EthersChain::connect(&config, signer.wallet().clone())?);

    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    let store = Arc::new(PinataClient::new(
        client,
        &config.pinata_url,
        &config.pinata_api_key,
        &config.pinata_api_secret_key,
    ));

    // ─── Background status sync ───────────────────────────
    let shutdown = CancellationToken::new();
    let sync_task = if config.status_sync_interval_secs > 0 {
        let sync_state = Arc::new(sync::SyncState {
            pool: pool.clone(),
            chain: chain.clone(),
            interval: Duration::from_secs(config.status_sync_interval_secs),
        });
        Some(tokio::spawn(sync::run(sync_state, shutdown.clone())))
    } else {
        None
    };

    // ─── REST API ─────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.api_port);
    let state = Arc::new(api::AppState {
        pool,
        chain,
        store,
        signer,
        config,
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("API listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
                shutdown.cancel();
            }
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = sync_task {
        task.await?;
    }

    Ok(())
}
