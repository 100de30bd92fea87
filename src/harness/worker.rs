//! Multi-worker execution
//!
//! Thread-per-worker, each with its own current-thread runtime:
//!
//! ```text
//!   worker-0 ──┐
//!   worker-1 ──┼── mpsc ──► coordinator (merge + status line)
//!   worker-N ──┘
//! ```
//!
//! Each worker owns a contiguous share of `parallel_calls` and runs all
//! `iterations` batches over it. Workers send every settled batch for
//! progress and their totals once done.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use super::progress::StatusLine;
use super::{HarnessError, LoadConfig, RunStats, ShutdownSignal, Workload, run_batches};
use crate::client::TransferClient;

enum WorkerMessage {
    Batch { stats: RunStats },
    Finished { worker: usize, stats: RunStats },
    Failed { worker: usize, error: std::io::Error },
}

/// Split `total` calls over `workers` as evenly as possible; the first
/// `total % workers` workers take one extra call.
pub fn shard_sizes(total: usize, workers: usize) -> Vec<usize> {
    let workers = workers.max(1);
    let base = total / workers;
    let extra = total % workers;
    (0..workers).map(|i| base + usize::from(i < extra)).collect()
}

/// Run the batched load across worker threads and merge their statistics
pub async fn run_workers<C: TransferClient>(
    client: &C,
    config: &LoadConfig,
    shutdown: Arc<ShutdownSignal>,
    status: &StatusLine,
) -> Result<RunStats, HarnessError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let mut handles: Vec<(usize, JoinHandle<()>)> = Vec::new();

    for (worker, shard) in shard_sizes(config.parallel_calls, config.workers)
        .into_iter()
        .enumerate()
    {
        if shard == 0 {
            continue;
        }

        let client = client.for_worker()?;
        let tx = tx.clone();
        let shutdown = shutdown.clone();
        let accounts = config.accounts.clone();
        let amounts = config.amounts;
        let iterations = config.iterations;

        let handle = std::thread::Builder::new()
            .name(format!("loadgen-worker-{worker}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(error) => {
                        let _ = tx.send(WorkerMessage::Failed { worker, error });
                        return;
                    }
                };

                let stats = runtime.block_on(async {
                    let mut workload = Workload::new(accounts, amounts);
                    run_batches(&client, &mut workload, shard, iterations, &shutdown, |batch| {
                        let _ = tx.send(WorkerMessage::Batch {
                            stats: batch.clone(),
                        });
                    })
                    .await
                });
                tracing::debug!(worker, calls = stats.calls, "worker finished");
                let _ = tx.send(WorkerMessage::Finished { worker, stats });
            })
            .map_err(|source| HarnessError::WorkerStart { worker, source })?;

        tracing::debug!(worker, shard, "worker started");
        handles.push((worker, handle));
    }
    // Channel closes once every worker has dropped its sender
    drop(tx);

    let total_calls = config.total_calls();
    let mut running = RunStats::new();
    let mut totals = RunStats::new();
    let mut failure = None;

    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Batch { stats } => {
                running.merge(&stats);
                status.batch(&running, total_calls);
            }
            WorkerMessage::Finished { stats, .. } => totals.merge(&stats),
            WorkerMessage::Failed { worker, error } => {
                tracing::error!(worker, error = %error, "worker failed to start its runtime");
                shutdown.request_shutdown();
                failure.get_or_insert(HarnessError::WorkerStart {
                    worker,
                    source: error,
                });
            }
        }
    }

    for (worker, handle) in handles {
        if handle.join().is_err() {
            tracing::error!(worker, "worker panicked");
            failure.get_or_insert(HarnessError::WorkerPanicked(worker));
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(totals),
    }
}
