//! Transfer Error Types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::AccountId;
use crate::store::StoreError;

/// Coarse error taxonomy, one per [`TransferError`] variant family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConcurrencyConflict,
    AccountNotFound,
    InsufficientBalance,
    OtherStoreError,
    ConnectionCorrupted,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    /// Whether the retry loop may run the transaction again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ConcurrencyConflict)
    }
}

/// Precondition a request failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("payer and payee must be different accounts")]
    SameAccount,

    #[error("amount must be greater than zero")]
    NonPositiveAmount,
}

/// Transfer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(InvalidRequest),

    // === Business Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient balance in account {account} (would become {balance})")]
    InsufficientBalance { account: AccountId, balance: Decimal },

    // === Store Errors ===
    #[error("{message}")]
    ConcurrencyConflict { code: String, message: String },

    #[error("{message}")]
    Store { code: String, message: String },

    /// Rollback failed after `cause`; the session was discarded
    #[error("{cause} (rollback failed: {rollback}; connection discarded)")]
    ConnectionCorrupted {
        cause: Box<TransferError>,
        rollback: StoreError,
    },

    // === System Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TransferError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            TransferError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            TransferError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            TransferError::Store { .. } => ErrorKind::OtherStoreError,
            TransferError::ConnectionCorrupted { .. } => ErrorKind::ConnectionCorrupted,
            TransferError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Error code for API responses.
    ///
    /// Store-originated errors report the store's SQLSTATE so clients can
    /// tell a conflict (`40001`) from everything else. A corrupted
    /// connection reports the code of the error that triggered the
    /// rollback.
    pub fn code(&self) -> &str {
        match self {
            TransferError::InvalidRequest(InvalidRequest::SameAccount) => "SAME_ACCOUNT",
            TransferError::InvalidRequest(InvalidRequest::NonPositiveAmount) => "INVALID_AMOUNT",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TransferError::ConcurrencyConflict { code, .. } | TransferError::Store { code, .. } => {
                code
            }
            TransferError::ConnectionCorrupted { cause, .. } => cause.code(),
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the transfer endpoint. Business and store failures
    /// are ordinary outcomes reported in the body with 200.
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Internal(_) => 500,
            _ => 200,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { code, message } => {
                TransferError::ConcurrencyConflict { code, message }
            }
            StoreError::Database { code, message } => TransferError::Store { code, message },
            other => TransferError::Store {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<InvalidRequest> for TransferError {
    fn from(e: InvalidRequest) -> Self {
        TransferError::InvalidRequest(e)
    }
}
