//! Database preparation: schema and bulk account creation

pub mod accounts;
pub mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use accounts::{AccountSetup, SetupReport, export_ids, run};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to write accounts file {}: {source}", path.display())]
    AccountsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("setup worker {0} panicked")]
    WorkerPanicked(usize),
}
