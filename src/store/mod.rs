//! Transactional Store
//!
//! The transfer protocol talks to the store through two narrow traits:
//!
//! - [`Store`]: a bounded pool handing out sessions
//! - [`Session`]: one exclusively-owned connection driving explicit
//!   `BEGIN` / `COMMIT` / `ROLLBACK`
//!
//! Driver errors are classified once, here, into the closed [`StoreError`]
//! enum. Callers match on variants and never inspect raw SQLSTATE codes.

pub mod memory;
pub mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgStore};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{AccountId, TransactionRecord};

/// SQLSTATE the store raises when a transaction cannot be serialized
/// against concurrently committed transactions.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Store error, classified by the adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict; the transaction may be retried
    #[error("{message}")]
    Conflict { code: String, message: String },

    /// Any other error reported by the database itself
    #[error("{message}")]
    Database { code: String, message: String },

    /// Network, TLS, pool or protocol failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Driver-side failure (decode, type mismatch, ...)
    #[error("driver error: {0}")]
    Driver(String),
}

impl StoreError {
    /// Classify a database-reported error by its SQLSTATE
    pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some(SERIALIZATION_FAILURE) => StoreError::Conflict {
                code: SERIALIZATION_FAILURE.to_string(),
                message,
            },
            Some(code) => StoreError::Database {
                code: code.to_string(),
                message,
            },
            None => StoreError::Database {
                code: "UNKNOWN".to_string(),
                message,
            },
        }
    }

    /// Conflict error as the memory store reports it
    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::Conflict {
            code: SERIALIZATION_FAILURE.to_string(),
            message: message.into(),
        }
    }

    /// Store-native classification code
    pub fn code(&self) -> &str {
        match self {
            StoreError::Conflict { code, .. } | StoreError::Database { code, .. } => code,
            StoreError::Connection(_) => "CONNECTION",
            StoreError::Driver(_) => "DRIVER",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db_err) => {
                StoreError::from_code(db_err.code().as_deref(), db_err.message())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            other => StoreError::Driver(other.to_string()),
        }
    }
}

/// A pool of sessions against the transactional store
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Session: Session;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Check out a session. The caller owns it exclusively until it is
    /// dropped (returned to the pool) or discarded.
    async fn acquire(&self) -> Result<Self::Session, StoreError>;

    /// Round-trip liveness check
    async fn ping(&self) -> Result<(), StoreError>;

    /// Stop handing out sessions and release pooled connections
    async fn close(&self);
}

/// One checked-out connection
#[async_trait]
pub trait Session: Send {
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Subtract `amount` from the account, returning the new balance.
    /// `None` when no such account exists.
    async fn debit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Add `amount` to the account, returning the new balance.
    /// `None` when no such account exists.
    async fn credit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Append an audit record inside the current transaction
    async fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Evict the connection instead of returning it to the pool.
    /// Used when its transaction state can no longer be trusted.
    fn discard(self)
    where
        Self: Sized;
}
