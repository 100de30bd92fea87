//! Bulk account creation
//!
//! The id range still missing from the table is cut into one contiguous
//! share per worker. Every worker inserts its share in batches with a
//! server-side `generate_series`, so a batch of 10k accounts is one
//! statement and one round trip.

use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{SetupError, schema};
use crate::core_types::KeyScheme;

pub const BATCH_SIZE: i64 = 10_000;

const INSERT_SEQUENTIAL: &str = "INSERT INTO accounts (id, balance) \
     SELECT id, $3 FROM generate_series($1::BIGINT, $2::BIGINT) AS id \
     ON CONFLICT (id) DO NOTHING";
const INSERT_RANDOM: &str = "INSERT INTO accounts (id, balance) \
     SELECT gen_random_uuid(), $3 FROM generate_series($1::BIGINT, $2::BIGINT)";

#[derive(Debug, Clone)]
pub struct AccountSetup {
    /// Accounts the table should hold afterwards
    pub target: u64,
    pub workers: usize,
    pub starting_balance: Decimal,
    pub scheme: KeyScheme,
    /// Delete existing accounts and transactions first
    pub reset: bool,
    pub batch_size: i64,
    pub show_progress: bool,
}

impl Default for AccountSetup {
    fn default() -> Self {
        Self {
            target: 1000,
            workers: 1,
            starting_balance: Decimal::from(100),
            scheme: KeyScheme::Sequential,
            reset: false,
            batch_size: BATCH_SIZE,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Accounts present before anything was inserted
    pub existing: u64,
    pub inserted: u64,
    pub elapsed: Duration,
}

/// Split `first..=last` into at most `workers` contiguous ranges of
/// near-equal size, in ascending order.
pub fn worker_ranges(first: i64, last: i64, workers: usize) -> Vec<RangeInclusive<i64>> {
    if last < first {
        return Vec::new();
    }
    let total = last - first + 1;
    let workers = (workers.max(1) as i64).min(total);
    let base = total / workers;
    let extra = total % workers;

    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = first;
    for i in 0..workers {
        let len = base + i64::from(i < extra);
        ranges.push(start..=start + len - 1);
        start += len;
    }
    ranges
}

/// Cut one range into `(start, end)` batches of at most `size` ids
pub fn batches(range: RangeInclusive<i64>, size: i64) -> Vec<(i64, i64)> {
    let size = size.max(1);
    let (mut start, last) = range.into_inner();
    let mut out = Vec::new();
    while start <= last {
        let end = (start + size - 1).min(last);
        out.push((start, end));
        start = end + 1;
    }
    out
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} accounts ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar
}

pub async fn count_accounts(pool: &PgPool) -> Result<u64, SetupError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

/// Create the schema and top the accounts table up to `setup.target`.
///
/// Sequential ids are dense from 1, so an existing table of `n` accounts
/// only receives `n + 1..=target`. Random ids have no order; the shortfall
/// is inserted as fresh UUIDs.
pub async fn run(pool: &PgPool, setup: &AccountSetup) -> Result<SetupReport, SetupError> {
    let started = Instant::now();
    schema::create(pool, setup.scheme).await?;
    if setup.reset {
        schema::clear(pool).await?;
    }

    let existing = count_accounts(pool).await?;
    if existing >= setup.target {
        tracing::info!(existing, target = setup.target, "accounts already in place");
        return Ok(SetupReport {
            existing,
            inserted: 0,
            elapsed: started.elapsed(),
        });
    }

    let needed = setup.target - existing;
    let (first, last) = match setup.scheme {
        KeyScheme::Sequential => (existing as i64 + 1, setup.target as i64),
        KeyScheme::Random => (1, needed as i64),
    };
    let ranges = worker_ranges(first, last, setup.workers);
    tracing::info!(
        existing,
        needed,
        workers = ranges.len(),
        scheme = ?setup.scheme,
        "inserting accounts"
    );

    let bar = progress_bar(needed, setup.show_progress);
    let statement = match setup.scheme {
        KeyScheme::Sequential => INSERT_SEQUENTIAL,
        KeyScheme::Random => INSERT_RANDOM,
    };

    let tasks = ranges.into_iter().enumerate().map(|(worker, range)| {
        let pool = pool.clone();
        let bar = bar.clone();
        let balance = setup.starting_balance;
        let batch_size = setup.batch_size;
        tokio::spawn(async move {
            let mut inserted = 0u64;
            for (start, end) in batches(range, batch_size) {
                let result = sqlx::query(statement)
                    .bind(start)
                    .bind(end)
                    .bind(balance)
                    .execute(&pool)
                    .await?;
                inserted += result.rows_affected();
                bar.inc((end - start + 1) as u64);
                tracing::debug!(worker, start, end, "batch inserted");
            }
            Ok::<u64, SetupError>(inserted)
        })
    });

    let mut inserted = 0;
    let mut failure = None;
    for (worker, joined) in join_all(tasks).await.into_iter().enumerate() {
        match joined {
            Ok(Ok(n)) => inserted += n,
            Ok(Err(e)) => {
                tracing::error!(worker, error = %e, "setup worker failed");
                failure.get_or_insert(e);
            }
            Err(_) => {
                failure.get_or_insert(SetupError::WorkerPanicked(worker));
            }
        }
    }
    bar.finish();

    if let Some(err) = failure {
        return Err(err);
    }
    tracing::info!(inserted, elapsed_ms = started.elapsed().as_millis() as u64, "account setup complete");
    Ok(SetupReport {
        existing,
        inserted,
        elapsed: started.elapsed(),
    })
}

/// Write every account id to `path`, one per line, in the format the load
/// generator's `--accounts-file` reads back.
pub async fn export_ids(pool: &PgPool, scheme: KeyScheme, path: &Path) -> Result<u64, SetupError> {
    let file_error = |source| SetupError::AccountsFile {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(file_error)?;
    let mut out = BufWriter::new(file);
    let mut written = 0u64;

    match scheme {
        KeyScheme::Sequential => {
            let mut rows = sqlx::query_scalar::<_, i64>("SELECT id FROM accounts ORDER BY id").fetch(pool);
            while let Some(id) = rows.try_next().await? {
                writeln!(out, "{id}").map_err(file_error)?;
                written += 1;
            }
        }
        KeyScheme::Random => {
            let mut rows = sqlx::query_scalar::<_, Uuid>("SELECT id FROM accounts").fetch(pool);
            while let Some(id) = rows.try_next().await? {
                writeln!(out, "{id}").map_err(file_error)?;
                written += 1;
            }
        }
    }
    out.flush().map_err(file_error)?;
    tracing::info!(written, path = %path.display(), "account ids exported");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ranges_are_contiguous() {
        let ranges = worker_ranges(1, 10, 3);
        assert_eq!(ranges, vec![1..=4, 5..=7, 8..=10]);

        let ranges = worker_ranges(501, 1000, 4);
        assert_eq!(ranges.first().map(|r| *r.start()), Some(501));
        assert_eq!(ranges.last().map(|r| *r.end()), Some(1000));
        for pair in ranges.windows(2) {
            assert_eq!(*pair[0].end() + 1, *pair[1].start());
        }
    }

    #[test]
    fn test_worker_ranges_never_empty() {
        // More workers than ids
        assert_eq!(worker_ranges(1, 2, 8), vec![1..=1, 2..=2]);
        assert!(worker_ranges(5, 4, 2).is_empty());
        assert_eq!(worker_ranges(1, 3, 0), vec![1..=3]);
    }

    #[test]
    fn test_batches_cover_range() {
        assert_eq!(batches(1..=25, 10), vec![(1, 10), (11, 20), (21, 25)]);
        assert_eq!(batches(7..=7, 10_000), vec![(7, 7)]);
        let total: i64 = batches(1..=1_000_000, BATCH_SIZE)
            .iter()
            .map(|(s, e)| e - s + 1)
            .sum();
        assert_eq!(total, 1_000_000);
    }

    fn test_pool_url() -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://admin@localhost/postgres".into())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_incremental_setup_inserts_only_tail() {
        let pool = PgPool::connect(&test_pool_url()).await.unwrap();
        let mut setup = AccountSetup {
            target: 500,
            workers: 3,
            reset: true,
            batch_size: 100,
            show_progress: false,
            ..AccountSetup::default()
        };
        let first = run(&pool, &setup).await.unwrap();
        assert_eq!(first.inserted, 500);

        setup.reset = false;
        setup.target = 750;
        let second = run(&pool, &setup).await.unwrap();
        assert_eq!(second.existing, 500);
        assert_eq!(second.inserted, 250);
        assert_eq!(count_accounts(&pool).await.unwrap(), 750);

        let again = run(&pool, &setup).await.unwrap();
        assert_eq!(again.inserted, 0);
    }
}
