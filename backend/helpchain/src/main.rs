//! HelpChain lifecycle service entry point.
//!
//! Serves the REST API for aid packages, donations and deliveries, and
//! mirrors every lifecycle transition to the HelpChain contract through a
//! JSON-RPC relayer when one is configured.

mod api;
mod auth;
mod config;
mod db;
mod deliveries;
mod donations;
mod errors;
mod ledger;
mod models;
mod packages;
mod types;
mod verification;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use config::Config;
use ledger::{ChainMirror, DisabledLedger, JsonRpcLedger, LedgerClient};

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

    // ─── Chain mirror ─────────────────────────────────────
    let client: Arc<dyn LedgerClient> = match &config.ledger_rpc_url {
        Some(url) => {
            info!("Mirroring to contract {} via {url}", config.contract_address);
            let http = Client::builder().timeout(config.ledger_timeout).build()?;
            Arc::new(JsonRpcLedger::new(
                http,
                url.clone(),
                config.contract_address.clone(),
            ))
        }
        None => {
            warn!("LEDGER_RPC_URL not set; ledger mirroring disabled and donations refused");
            Arc::new(DisabledLedger)
        }
    };
    let mirror = ChainMirror::new(client, config.ledger_timeout);

    // ─── REST API ─────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.api_port);
    let app = api::router(AppState {
        pool,
        mirror,
        config,
    });

    info!("API listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
