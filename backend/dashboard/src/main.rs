//! Community fund dashboard: entry point.
//!
//! Starts a background task that periodically rebuilds the dashboard
//! snapshot (projects, votes, payout preview, fund variables) from the
//! fund contract over JSON-RPC, and exposes it through a small Axum REST
//! API together with the wallet-signed vote and submission flows.

mod actions;
mod api;
mod config;
mod dashboard;
mod errors;
mod estimator;
mod fee;
mod normalize;
mod rpc;
mod types;
mod validation;
mod wallet;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use dashboard::Dashboard;
use rpc::FundClient;
use wallet::{BridgeWallet, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Optional .env file.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    let client = Client::builder().timeout(config.rpc_timeout()).build()?;

    let dashboard = Arc::new(Dashboard::new(
        FundClient::new(client.clone(), &config),
        config.page_size,
    ));
    let session = Arc::new(Session::new(
        Arc::new(BridgeWallet::new(client, config.wallet_url.clone())),
        config.tx_wait_timeout(),
    ));
    session.probe().await;

    // ─── Background refresher ─────────────────────────────
    let shutdown = CancellationToken::new();
    let refresher = tokio::spawn(dashboard::run(
        dashboard.clone(),
        config.refresh_interval(),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { dashboard, session }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    refresher.await?;
    Ok(())
}
