//! Transfer service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────────┐    ┌──────────┐
//! │  Config  │───▶│ Gateway  │───▶│ TransferService  │───▶│  Store   │
//! │  (YAML)  │    │ (axum)   │    │ (OCC retry loop) │    │ (pg/mem) │
//! └──────────┘    └──────────┘    └──────────────────┘    └──────────┘
//! ```
//!
//! The store is opened once at startup, shared by every request, and
//! closed after the gateway has drained on Ctrl-C.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;

use occ_transfer::build_version;
use occ_transfer::config::{AppConfig, StoreKind};
use occ_transfer::credentials;
use occ_transfer::gateway::{AppState, run_server};
use occ_transfer::logging::init_logging;
use occ_transfer::service::{TransferConfig, TransferService};
use occ_transfer::store::{MemoryStore, PgStore, Store};

#[derive(Parser, Debug)]
#[command(name = "occ_transfer", version, about = "OCC-aware transfer service")]
struct Args {
    /// Configuration environment, reads config/<env>.yaml
    #[arg(short, long, default_value = "dev")]
    env: String,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested, draining in-flight requests");
    }
}

async fn serve_with<S: Store>(config: &AppConfig, store: Arc<S>) -> anyhow::Result<()> {
    let service = TransferService::new(store.clone(), TransferConfig::from(&config.transfer));
    let state = AppState::new(Arc::new(service), store.name());

    let result = run_server(&config.server, state, shutdown_signal()).await;
    store.close().await;
    tracing::info!(store = store.name(), "store closed");
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load(&args.env)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let _log_guard = init_logging(&config);

    tracing::info!(
        version = build_version(),
        env = %args.env,
        store = ?config.store.kind,
        "transfer service starting"
    );

    match config.store.kind {
        StoreKind::Postgres => {
            let provider = credentials::for_store(&config.store)?;
            let store = PgStore::connect(&config.store, provider)
                .await
                .with_context(|| format!("connecting to {}", config.store.endpoint))?;
            serve_with(&config, Arc::new(store)).await
        }
        StoreKind::Memory => {
            let balance = Decimal::from_str(&config.loadtest.starting_balance)
                .context("loadtest.starting_balance is not a decimal")?;
            let store = MemoryStore::new(config.store.max_connections as usize);
            store.open_accounts(config.store.memory_accounts, config.store.key_scheme, balance);
            tracing::info!(
                accounts = store.account_count(),
                %balance,
                "in-memory store seeded"
            );
            serve_with(&config, Arc::new(store)).await
        }
    }
}
