//! OCC-aware money transfers and a concurrent load generator.
//!
//! # Modules
//!
//! - [`store`] - Transactional store seam (PostgreSQL and in-memory OCC)
//! - [`service`] - Transfer operation with the conflict retry loop
//! - [`gateway`] - HTTP endpoint in front of the service
//! - [`client`] - Invocation clients used by the load generator
//! - [`harness`] - Batched, multi-worker and sustained load runs
//! - [`setup`] - Schema and bulk account creation
//! - [`history`] - Recent-transaction lookup
//! - [`credentials`] - Store credentials with expiry-aware caching

pub mod core_types;

pub mod config;
pub mod credentials;
pub mod logging;

pub mod store;

pub mod service;

pub mod gateway;

pub mod client;
pub mod harness;

pub mod history;
pub mod setup;

pub use client::{HttpTransferClient, InvokeError, LocalClient, TransferClient};
pub use config::AppConfig;
pub use core_types::{AccountId, KeyScheme, TransactionRecord};
pub use harness::{LoadConfig, LoadTest, RunStats, RunSummary, ShutdownSignal};
pub use service::{
    TransferApi, TransferConfig, TransferError, TransferOutcome, TransferRequest, TransferService,
};
pub use store::{MemoryStore, PgStore, Session, Store, StoreError};

/// Crate version plus the git revision it was built from
pub fn build_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("OCC_TRANSFER_REVISION"), ")")
}
