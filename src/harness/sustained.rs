//! Sustained load
//!
//! Keeps `parallel_calls` invocations in flight, refilling each slot as
//! soon as a call completes, until shutdown (or an optional time limit).
//! Reports a rolling status line once per second.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;

use super::progress::{StatusLine, sustained_status};
use super::{
    AccountPool, AmountStrategy, HarnessError, RunStats, RunSummary, ShutdownSignal, Workload,
    validate_pool,
};
use crate::client::TransferClient;

const REPORT_EVERY: Duration = Duration::from_secs(1);
const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SustainedConfig {
    pub parallel_calls: usize,
    pub accounts: AccountPool,
    pub amounts: AmountStrategy,
    /// Stop on its own after this long
    pub max_duration: Option<Duration>,
    pub show_progress: bool,
}

pub async fn run_sustained<C: TransferClient>(
    client: Arc<C>,
    config: &SustainedConfig,
    shutdown: Arc<ShutdownSignal>,
) -> Result<RunSummary, HarnessError> {
    if config.parallel_calls == 0 {
        return Err(HarnessError::InvalidConfig(
            "parallel_calls must be at least 1".into(),
        ));
    }
    validate_pool(&config.accounts)?;
    tracing::info!(
        parallel_calls = config.parallel_calls,
        accounts = config.accounts.len(),
        "sustained load starting"
    );

    let status = StatusLine::new(config.show_progress);
    let mut workload = Workload::new(config.accounts.clone(), config.amounts);
    let mut stats = RunStats::new();
    let mut in_flight = FuturesUnordered::new();

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_calls = 0u64;
    let client = client.as_ref();

    loop {
        let expired = config
            .max_duration
            .is_some_and(|limit| started.elapsed() >= limit);
        if expired {
            shutdown.request_shutdown();
        }
        let accepting = !shutdown.is_shutdown_requested();
        if !accepting && in_flight.is_empty() {
            break;
        }

        if accepting {
            while in_flight.len() < config.parallel_calls {
                let request = workload.next_request();
                in_flight.push(async move {
                    let call_started = Instant::now();
                    let result = client.invoke(&request).await;
                    (result, call_started.elapsed())
                });
            }
        }

        // Bounded wait so the shutdown flag and report timer are checked
        if let Ok(Some((result, elapsed))) = tokio::time::timeout(POLL_SLICE, in_flight.next()).await {
            stats.record(&result, elapsed);
        }

        if last_report.elapsed() >= REPORT_EVERY {
            status.set_message(sustained_status(
                &stats,
                stats.calls - last_calls,
                last_report.elapsed(),
                in_flight.len(),
            ));
            last_calls = stats.calls;
            last_report = Instant::now();
        }
    }

    status.finish();
    tracing::info!(calls = stats.calls, errors = stats.errors, "sustained load stopped");
    Ok(RunSummary {
        elapsed: started.elapsed(),
        planned_calls: stats.calls,
        interrupted: false,
        stats,
    })
}
