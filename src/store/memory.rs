//! In-process OCC store
//!
//! Rows carry a version. A session reads through to the shared table,
//! buffers its writes, and validates every version it read at `COMMIT`.
//! If any row moved underneath it the commit fails with a serialization
//! conflict, exactly the way a distributed SQL store with optimistic
//! concurrency behaves. No locks are held between statements.
//!
//! Every session call yields to the scheduler first so that concurrent
//! transfers interleave even on a current-thread runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::{Session, Store, StoreError};
use crate::core_types::{AccountId, KeyScheme, TransactionRecord};

const CONFLICT_MESSAGE: &str =
    "change conflicts with another transaction, please retry: (OC000)";

#[derive(Debug, Clone, Copy)]
struct Row {
    balance: Decimal,
    version: u64,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Row>,
    history: Vec<TransactionRecord>,
}

#[derive(Debug)]
struct Inner {
    tables: Mutex<Tables>,
    sessions: Arc<Semaphore>,
    acquire_timeout: Duration,
    closed: AtomicBool,
    // Fault injection
    pending_conflicts: AtomicU32,
    pending_rollback_failures: AtomicU32,
    // Counters
    commits: AtomicU64,
    conflicts: AtomicU64,
    discarded: AtomicU64,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a half-applied commit:
        // writes are applied only after validation succeeds.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Take one unit from a fault counter, if any are pending
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory transactional store with optimistic concurrency control
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MemoryStore {
    /// Create an empty store with at most `max_sessions` sessions checked out
    pub fn new(max_sessions: usize) -> Self {
        Self::with_acquire_timeout(max_sessions, Duration::from_secs(5))
    }

    pub fn with_acquire_timeout(max_sessions: usize, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                sessions: Arc::new(Semaphore::new(max_sessions.max(1))),
                acquire_timeout,
                closed: AtomicBool::new(false),
                pending_conflicts: AtomicU32::new(0),
                pending_rollback_failures: AtomicU32::new(0),
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Insert or overwrite accounts
    pub fn seed<I>(&self, accounts: I)
    where
        I: IntoIterator<Item = (AccountId, Decimal)>,
    {
        let mut tables = self.inner.tables();
        for (id, balance) in accounts {
            tables.accounts.insert(id, Row { balance, version: 0 });
        }
    }

    /// Create `count` accounts under `scheme`, all holding `balance`.
    /// Sequential ids continue after the highest existing one.
    pub fn open_accounts(
        &self,
        count: usize,
        scheme: KeyScheme,
        balance: Decimal,
    ) -> Vec<AccountId> {
        let mut tables = self.inner.tables();
        let next_seq = tables
            .accounts
            .keys()
            .filter_map(|id| match id {
                AccountId::Seq(n) => Some(*n),
                AccountId::Uuid(_) => None,
            })
            .max()
            .unwrap_or(0)
            + 1;

        let ids: Vec<AccountId> = match scheme {
            KeyScheme::Sequential => (0..count as i64)
                .map(|i| AccountId::Seq(next_seq + i))
                .collect(),
            KeyScheme::Random => (0..count).map(|_| AccountId::Uuid(Uuid::new_v4())).collect(),
        };
        for id in &ids {
            tables.accounts.insert(*id, Row { balance, version: 0 });
        }
        ids
    }

    /// Committed balance of one account
    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        self.inner.tables().accounts.get(&id).map(|row| row.balance)
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> Decimal {
        self.inner
            .tables()
            .accounts
            .values()
            .map(|row| row.balance)
            .sum()
    }

    pub fn account_count(&self) -> usize {
        self.inner.tables().accounts.len()
    }

    /// Committed transaction records, oldest first
    pub fn history(&self) -> Vec<TransactionRecord> {
        self.inner.tables().history.clone()
    }

    /// Most recent `limit` records paid by `payer`, newest first
    pub fn recent_transactions(&self, payer: AccountId, limit: usize) -> Vec<TransactionRecord> {
        self.inner
            .tables()
            .history
            .iter()
            .rev()
            .filter(|r| r.payer_id == payer)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Make the next `n` commits fail with a serialization conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.pending_conflicts.fetch_add(n, Ordering::AcqRel);
    }

    /// Make the next `n` rollbacks fail as if the connection dropped
    pub fn fail_next_rollbacks(&self, n: u32) {
        self.inner
            .pending_rollback_failures
            .fetch_add(n, Ordering::AcqRel);
    }

    pub fn committed(&self) -> u64 {
        self.inner.commits.load(Ordering::Relaxed)
    }

    /// Commits rejected by validation or injection
    pub fn conflicts(&self) -> u64 {
        self.inner.conflicts.load(Ordering::Relaxed)
    }

    /// Sessions evicted instead of being returned to the pool
    pub fn discarded_sessions(&self) -> u64 {
        self.inner.discarded.load(Ordering::Relaxed)
    }

    /// Sessions currently available for checkout
    pub fn idle_sessions(&self) -> usize {
        self.inner.sessions.available_permits()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn acquire(&self) -> Result<MemorySession, StoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Connection("store is closed".to_string()));
        }
        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.sessions.clone().acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::Connection("timed out acquiring a session".to_string()))?
        .map_err(|_| StoreError::Connection("store is closed".to_string()))?;

        Ok(MemorySession {
            inner: self.inner.clone(),
            _permit: permit,
            tx: None,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Connection("store is closed".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.sessions.close();
    }
}

#[derive(Debug, Default)]
struct TxState {
    /// Version of every row this transaction has read
    reads: HashMap<AccountId, u64>,
    /// Buffered new balances
    writes: HashMap<AccountId, Decimal>,
    records: Vec<TransactionRecord>,
}

/// Session on a [`MemoryStore`]. Holds one pool slot until dropped.
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
    tx: Option<TxState>,
}

impl MemorySession {
    fn active_tx(&mut self) -> Result<&mut TxState, StoreError> {
        self.tx.as_mut().ok_or_else(|| StoreError::Database {
            code: "25P01".to_string(),
            message: "no transaction is in progress".to_string(),
        })
    }

    async fn adjust(
        &mut self,
        account: AccountId,
        delta: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        tokio::task::yield_now().await;
        let inner = self.inner.clone();
        let tx = self.active_tx()?;

        let current = match tx.writes.get(&account) {
            Some(balance) => *balance,
            None => {
                let tables = inner.tables();
                let Some(row) = tables.accounts.get(&account) else {
                    return Ok(None);
                };
                tx.reads.entry(account).or_insert(row.version);
                row.balance
            }
        };

        let updated = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Database {
                code: "22003".to_string(),
                message: "numeric field overflow".to_string(),
            })?;
        tx.writes.insert(account, updated);
        Ok(Some(updated))
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.tx = Some(TxState::default());
        Ok(())
    }

    async fn debit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        self.adjust(account, -amount).await
    }

    async fn credit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        self.adjust(account, amount).await
    }

    async fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.active_tx()?.records.push(record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let tx = self.tx.take().ok_or_else(|| StoreError::Database {
            code: "25P01".to_string(),
            message: "no transaction is in progress".to_string(),
        })?;

        if take_fault(&self.inner.pending_conflicts) {
            self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::conflict(CONFLICT_MESSAGE));
        }

        let mut tables = self.inner.tables();
        let stale = tx.reads.iter().any(|(id, seen)| {
            tables
                .accounts
                .get(id)
                .is_none_or(|row| row.version != *seen)
        });
        if stale {
            self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::conflict(CONFLICT_MESSAGE));
        }

        for (id, balance) in tx.writes {
            if let Some(row) = tables.accounts.get_mut(&id) {
                row.balance = balance;
                row.version += 1;
            }
        }
        tables.history.extend(tx.records);
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if take_fault(&self.inner.pending_rollback_failures) {
            return Err(StoreError::Connection(
                "connection reset by peer during ROLLBACK".to_string(),
            ));
        }
        self.tx = None;
        Ok(())
    }

    fn discard(self) {
        self.inner.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(store = "memory", "session discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn store_with(accounts: &[(i64, Decimal)]) -> MemoryStore {
        let store = MemoryStore::new(4);
        store.seed(accounts.iter().map(|(id, b)| (AccountId::Seq(*id), *b)));
        store
    }

    #[tokio::test]
    async fn test_commit_applies_buffered_writes() {
        let store = store_with(&[(1, d(100)), (2, d(100))]);
        let mut session = store.acquire().await.unwrap();

        session.begin().await.unwrap();
        assert_eq!(
            session.debit(AccountId::Seq(1), d(10)).await.unwrap(),
            Some(d(90))
        );
        assert_eq!(
            session.credit(AccountId::Seq(2), d(10)).await.unwrap(),
            Some(d(110))
        );
        // Not visible before commit
        assert_eq!(store.balance(AccountId::Seq(1)), Some(d(100)));

        session.commit().await.unwrap();
        assert_eq!(store.balance(AccountId::Seq(1)), Some(d(90)));
        assert_eq!(store.balance(AccountId::Seq(2)), Some(d(110)));
        assert_eq!(store.committed(), 1);
    }

    #[tokio::test]
    async fn test_missing_account_returns_none() {
        let store = store_with(&[(1, d(100))]);
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        assert_eq!(session.debit(AccountId::Seq(999), d(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = store_with(&[(1, d(100))]);
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        session.debit(AccountId::Seq(1), d(40)).await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(store.balance(AccountId::Seq(1)), Some(d(100)));
        assert!(session.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_stale_read_conflicts_at_commit() {
        let store = store_with(&[(1, d(100)), (2, d(100))]);
        let mut a = store.acquire().await.unwrap();
        let mut b = store.acquire().await.unwrap();

        a.begin().await.unwrap();
        b.begin().await.unwrap();
        a.debit(AccountId::Seq(1), d(10)).await.unwrap();
        b.debit(AccountId::Seq(1), d(20)).await.unwrap();

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.code(), "40001");

        assert_eq!(store.balance(AccountId::Seq(1)), Some(d(90)));
        assert_eq!(store.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = store_with(&[(1, d(100))]);
        store.inject_conflicts(1);
        store.fail_next_rollbacks(1);

        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        session.debit(AccountId::Seq(1), d(1)).await.unwrap();
        assert!(session.commit().await.unwrap_err().is_conflict());
        assert_eq!(session.rollback().await.unwrap_err().code(), "CONNECTION");
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_frees_slot_and_counts() {
        let store = MemoryStore::new(1);
        let session = store.acquire().await.unwrap();
        assert_eq!(store.idle_sessions(), 0);
        session.discard();
        assert_eq!(store.idle_sessions(), 1);
        assert_eq!(store.discarded_sessions(), 1);
    }

    #[tokio::test]
    async fn test_session_dropped_mid_transaction_leaves_no_writes() {
        let store = MemoryStore::new(1);
        store.seed([(AccountId::Seq(1), d(100)), (AccountId::Seq(2), d(100)), (AccountId::Seq(3), d(100))]);
        {
            let mut abandoned = store.acquire().await.unwrap();
            abandoned.begin().await.unwrap();
            abandoned.debit(AccountId::Seq(1), d(10)).await.unwrap();
        }

        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        session.debit(AccountId::Seq(2), d(1)).await.unwrap();
        session.credit(AccountId::Seq(3), d(1)).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(store.balance(AccountId::Seq(1)), Some(d(100)));
        assert_eq!(store.total_balance(), d(300));
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let store = MemoryStore::with_acquire_timeout(1, Duration::from_millis(20));
        let _held = store.acquire().await.unwrap();
        let err = store.acquire().await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION");
    }

    #[tokio::test]
    async fn test_closed_store_refuses_sessions() {
        let store = MemoryStore::new(2);
        store.close().await;
        assert!(store.acquire().await.is_err());
        assert!(store.ping().await.is_err());
    }

    #[test]
    fn test_open_accounts_continues_sequence() {
        let store = store_with(&[(1, d(5)), (2, d(5))]);
        let ids = store.open_accounts(3, KeyScheme::Sequential, d(100));
        assert_eq!(ids, vec![AccountId::Seq(3), AccountId::Seq(4), AccountId::Seq(5)]);
        assert_eq!(store.total_balance(), d(310));

        let uuids = store.open_accounts(2, KeyScheme::Random, d(1));
        assert!(uuids.iter().all(|id| id.scheme() == KeyScheme::Random));
        assert_eq!(store.account_count(), 7);
    }
}
