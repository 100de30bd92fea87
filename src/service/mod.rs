//! Transfer Service
//!
//! Moves funds between two accounts in one store transaction and survives
//! optimistic-concurrency conflicts by re-running the whole transaction.
//!
//! # Protocol
//!
//! ```text
//! acquire session ──► BEGIN ─► debit payer ─► credit payee ─► [record] ─► COMMIT ─► release
//!                       ▲            │              │             │          │
//!                       │            └──────────────┴─────────────┴──────────┤ error
//!                       │                                                    ▼
//!                       └──── conflict & policy allows ◄──────────────── ROLLBACK
//!                                                                            │ fails
//!                                                                            ▼
//!                                                                   discard session
//! ```
//!
//! The session is owned by one invocation for its whole retry loop. A
//! session whose rollback failed is never handed back to the pool.

pub mod config;
pub mod error;

pub use config::{Backoff, TransferConfig, TransferConfigBuilder};
pub use error::{ErrorKind, InvalidRequest, TransferError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, TransactionRecord};
use crate::store::{Session, Store, StoreError};

/// A request to move `amount` from `payer_id` to `payee_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub payer_id: AccountId,
    pub payee_id: AccountId,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(payer_id: impl Into<AccountId>, payee_id: impl Into<AccountId>, amount: Decimal) -> Self {
        Self {
            payer_id: payer_id.into(),
            payee_id: payee_id.into(),
            amount,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.payer_id == self.payee_id {
            return Err(InvalidRequest::SameAccount);
        }
        if self.amount <= Decimal::ZERO {
            return Err(InvalidRequest::NonPositiveAmount);
        }
        Ok(())
    }
}

/// Committed transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub payer_balance: Decimal,
    pub retries: u32,
    pub duration: Duration,
}

/// Failed transfer, with the work spent on it
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFailure {
    pub error: TransferError,
    pub retries: u32,
    pub duration: Duration,
}

/// Stateless transfer handler over an injected store
pub struct TransferService<S: Store> {
    store: Arc<S>,
    config: TransferConfig,
}

impl<S: Store> Clone for TransferService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> TransferService<S> {
    pub fn new(store: Arc<S>, config: TransferConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run one transfer to completion, retrying conflicts per the policy
    pub async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        let started = Instant::now();
        let fail = |error: TransferError, retries: u32| TransferFailure {
            error,
            retries,
            duration: started.elapsed(),
        };

        request.validate().map_err(|e| fail(e.into(), 0))?;

        let mut session = self
            .store
            .acquire()
            .await
            .map_err(|e| fail(e.into(), 0))?;

        let mut retries = 0u32;
        loop {
            let error = match self.attempt(&mut session, request).await {
                Ok(payer_balance) => {
                    if retries > 0 {
                        tracing::debug!(
                            payer = %request.payer_id,
                            payee = %request.payee_id,
                            retries,
                            "transfer committed after conflicts"
                        );
                    }
                    return Ok(TransferOutcome {
                        payer_balance,
                        retries,
                        duration: started.elapsed(),
                    });
                }
                Err(error) => error,
            };

            if let Err(rollback) = session.rollback().await {
                tracing::error!(
                    store = self.store.name(),
                    error = %error,
                    rollback_error = %rollback,
                    "rollback failed, discarding session"
                );
                session.discard();
                return Err(fail(
                    TransferError::ConnectionCorrupted {
                        cause: Box::new(error),
                        rollback,
                    },
                    retries,
                ));
            }

            if !(error.kind().is_retryable() && self.config.may_retry(retries)) {
                tracing::debug!(
                    payer = %request.payer_id,
                    payee = %request.payee_id,
                    code = error.code(),
                    retries,
                    "transfer failed"
                );
                return Err(fail(error, retries));
            }

            retries += 1;
            tracing::trace!(
                payer = %request.payer_id,
                payee = %request.payee_id,
                retries,
                "serialization conflict, retrying"
            );
            if let Some(backoff) = self.config.backoff {
                let delay = backoff.delay(retries, &mut rand::thread_rng());
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// One `BEGIN .. COMMIT` pass. Leaves the transaction open on error.
    async fn attempt(
        &self,
        session: &mut S::Session,
        request: &TransferRequest,
    ) -> Result<Decimal, TransferError> {
        session.begin().await?;

        let payer_balance = session
            .debit(request.payer_id, request.amount)
            .await?
            .ok_or(TransferError::AccountNotFound(request.payer_id))?;
        if payer_balance < Decimal::ZERO {
            return Err(TransferError::InsufficientBalance {
                account: request.payer_id,
                balance: payer_balance,
            });
        }

        session
            .credit(request.payee_id, request.amount)
            .await?
            .ok_or(TransferError::AccountNotFound(request.payee_id))?;

        if self.config.record_history {
            let record =
                TransactionRecord::new(request.payer_id, request.payee_id, request.amount);
            session.append_record(&record).await?;
        }

        session.commit().await?;
        Ok(payer_balance)
    }
}

/// Store-agnostic view of a transfer service, for callers that pick the
/// backend at runtime (HTTP gateway, in-process client)
#[async_trait]
pub trait TransferApi: Send + Sync + 'static {
    async fn transfer(&self, request: TransferRequest)
    -> Result<TransferOutcome, TransferFailure>;

    /// Store liveness
    async fn ping(&self) -> Result<(), StoreError>;

    fn config(&self) -> &TransferConfig;
}

#[async_trait]
impl<S: Store> TransferApi for TransferService<S> {
    async fn transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        TransferService::transfer(self, &request).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    fn config(&self) -> &TransferConfig {
        &self.config
    }
}
