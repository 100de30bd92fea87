//! Load-test harness
//!
//! Fires many concurrent transfer invocations and aggregates what comes
//! back. Two execution modes:
//!
//! - **single worker**: batches of `parallel_calls` invocations multiplexed
//!   on the calling task, `iterations` times
//! - **multi worker**: `parallel_calls` split across OS threads, each with
//!   its own current-thread runtime, reporting to the coordinator over a
//!   channel
//!
//! Batches are the only synchronization points. A shutdown request stops
//! new batches from starting; calls already in flight complete and are
//! counted.

pub mod progress;
pub mod stats;
pub mod sustained;
pub mod worker;

pub use stats::{RunStats, RunSummary};
pub use sustained::{SustainedConfig, run_sustained};

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::client::{InvokeError, TransferClient};
use crate::core_types::AccountId;
use crate::service::TransferRequest;
use progress::StatusLine;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("invalid load configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read accounts file {path}: {source}")]
    AccountsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid account id `{value}`")]
    InvalidAccountId {
        path: String,
        line: usize,
        value: String,
    },

    #[error("client error: {0}")]
    Client(#[from] InvokeError),

    #[error("failed to start worker {worker}: {source}")]
    WorkerStart {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

// ============================================================
// SHUTDOWN SIGNALING
// ============================================================

/// Shutdown signal for graceful run termination
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    shutdown: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown on Ctrl-C. Must be called inside a tokio runtime.
    pub fn install_ctrl_c(self: &Arc<Self>) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing in-flight calls");
                eprintln!("\nShutting down, waiting for in-flight calls...");
                signal.request_shutdown();
            }
        });
    }
}

// ============================================================
// WORKLOAD
// ============================================================

/// Accounts the harness picks payer/payee from
#[derive(Debug, Clone)]
pub enum AccountPool {
    /// Dense integer ids `1..=count`
    Range { count: u64 },
    /// Explicit ids, e.g. pre-generated UUIDs
    List(Arc<Vec<AccountId>>),
}

impl AccountPool {
    pub fn len(&self) -> u64 {
        match self {
            AccountPool::Range { count } => *count,
            AccountPool::List(ids) => ids.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One id per line; blank lines and `#` comments are skipped
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::AccountsFile {
            path: display.clone(),
            source,
        })?;
        Self::parse_list(&content, &display)
    }

    fn parse_list(content: &str, origin: &str) -> Result<Self, HarnessError> {
        let mut ids = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let id = line
                .parse::<AccountId>()
                .map_err(|_| HarnessError::InvalidAccountId {
                    path: origin.to_string(),
                    line: i + 1,
                    value: line.to_string(),
                })?;
            ids.push(id);
        }
        Ok(AccountPool::List(Arc::new(ids)))
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> AccountId {
        match self {
            AccountPool::Range { count } => AccountId::Seq(rng.gen_range(1..=*count as i64)),
            AccountPool::List(ids) => ids[rng.gen_range(0..ids.len())],
        }
    }

    /// Two distinct accounts, uniformly at random. Pool must hold at
    /// least two distinct ids.
    pub fn pick_pair<R: Rng + ?Sized>(&self, rng: &mut R) -> (AccountId, AccountId) {
        let payer = self.pick(rng);
        let mut payee = self.pick(rng);
        while payee == payer {
            payee = self.pick(rng);
        }
        (payer, payee)
    }
}

/// How the amount of each transfer is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountStrategy {
    Fixed(Decimal),
    /// Whole units, uniformly in `min..=max`
    Uniform { min: u64, max: u64 },
}

impl Default for AmountStrategy {
    fn default() -> Self {
        AmountStrategy::Fixed(Decimal::ONE)
    }
}

impl AmountStrategy {
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Decimal {
        match *self {
            AmountStrategy::Fixed(amount) => amount,
            AmountStrategy::Uniform { min, max } => Decimal::from(rng.gen_range(min..=max)),
        }
    }
}

/// `"5"` or `"2.50"` for a fixed amount, `"1..100"` for a uniform range
impl FromStr for AmountStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((lo, hi)) = s.split_once("..") {
            let min = lo.trim().parse::<u64>().map_err(|e| format!("bad range start: {e}"))?;
            let max = hi
                .trim()
                .trim_start_matches('=')
                .parse::<u64>()
                .map_err(|e| format!("bad range end: {e}"))?;
            if min == 0 || min > max {
                return Err(format!("amount range must satisfy 1 <= min <= max, got {min}..{max}"));
            }
            return Ok(AmountStrategy::Uniform { min, max });
        }
        let amount = Decimal::from_str(s.trim()).map_err(|e| format!("bad amount: {e}"))?;
        if amount <= Decimal::ZERO {
            return Err("amount must be positive".to_string());
        }
        Ok(AmountStrategy::Fixed(amount))
    }
}

/// Random transfer request generator
pub struct Workload {
    accounts: AccountPool,
    amounts: AmountStrategy,
    rng: StdRng,
}

impl Workload {
    pub fn new(accounts: AccountPool, amounts: AmountStrategy) -> Self {
        Self {
            accounts,
            amounts,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn next_request(&mut self) -> TransferRequest {
        let (payer_id, payee_id) = self.accounts.pick_pair(&mut self.rng);
        TransferRequest {
            payer_id,
            payee_id,
            amount: self.amounts.pick(&mut self.rng),
        }
    }

    pub fn batch(&mut self, size: usize) -> Vec<TransferRequest> {
        (0..size).map(|_| self.next_request()).collect()
    }
}

// ============================================================
// BATCHED RUN
// ============================================================

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub iterations: usize,
    pub parallel_calls: usize,
    pub workers: usize,
    pub accounts: AccountPool,
    pub amounts: AmountStrategy,
    /// Draw the status line on stderr
    pub show_progress: bool,
}

impl LoadConfig {
    pub fn total_calls(&self) -> u64 {
        self.iterations as u64 * self.parallel_calls as u64
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.parallel_calls == 0 {
            return Err(HarnessError::InvalidConfig("parallel_calls must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(HarnessError::InvalidConfig("workers must be at least 1".into()));
        }
        validate_pool(&self.accounts)
    }
}

pub(crate) fn validate_pool(accounts: &AccountPool) -> Result<(), HarnessError> {
    let distinct = match accounts {
        AccountPool::Range { count } => *count,
        AccountPool::List(ids) => ids.iter().collect::<HashSet<_>>().len() as u64,
    };
    if distinct < 2 {
        return Err(HarnessError::InvalidConfig(format!(
            "account pool needs at least 2 distinct accounts, has {distinct}"
        )));
    }
    Ok(())
}

/// Run `iterations` batches of `calls_per_batch` concurrent invocations.
/// `on_batch` receives each settled batch's statistics.
pub(crate) async fn run_batches<C, F>(
    client: &C,
    workload: &mut Workload,
    calls_per_batch: usize,
    iterations: usize,
    shutdown: &ShutdownSignal,
    mut on_batch: F,
) -> RunStats
where
    C: TransferClient,
    F: FnMut(&RunStats),
{
    let mut total = RunStats::new();
    for _ in 0..iterations {
        if shutdown.is_shutdown_requested() {
            break;
        }

        let calls = workload.batch(calls_per_batch).into_iter().map(|request| async move {
            let started = Instant::now();
            let result = client.invoke(&request).await;
            (result, started.elapsed())
        });

        let mut batch = RunStats::new();
        for (result, elapsed) in join_all(calls).await {
            batch.record(&result, elapsed);
        }
        on_batch(&batch);
        total.merge(&batch);
    }
    total
}

pub struct LoadTest;

impl LoadTest {
    /// Run the batched load test to completion or until shutdown
    pub async fn run<C: TransferClient>(
        client: Arc<C>,
        config: &LoadConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<RunSummary, HarnessError> {
        config.validate()?;
        tracing::info!(
            iterations = config.iterations,
            parallel_calls = config.parallel_calls,
            workers = config.workers,
            accounts = config.accounts.len(),
            "load test starting"
        );

        let status = StatusLine::new(config.show_progress);
        let total_calls = config.total_calls();

        let stats = if config.workers <= 1 {
            let mut workload = Workload::new(config.accounts.clone(), config.amounts);
            let mut running = RunStats::new();
            run_batches(
                client.as_ref(),
                &mut workload,
                config.parallel_calls,
                config.iterations,
                &shutdown,
                |batch| {
                    running.merge(batch);
                    status.batch(&running, total_calls);
                },
            )
            .await
        } else {
            worker::run_workers(client.as_ref(), config, shutdown.clone(), &status).await?
        };

        status.finish();
        let summary = RunSummary {
            elapsed: status.elapsed(),
            planned_calls: total_calls,
            interrupted: stats.calls < total_calls && shutdown.is_shutdown_requested(),
            stats,
        };
        tracing::info!(
            calls = summary.stats.calls,
            success = summary.stats.success,
            errors = summary.stats.errors,
            retries = summary.stats.total_retries,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "load test finished"
        );
        Ok(summary)
    }
}
