//! Load generator for the transfer service
//!
//! ```text
//! loadgen invoke    --payer 1 --payee 2 --amount 10
//! loadgen setup     --accounts 1000000 --workers 8
//! loadgen load      --iterations 10 --parallel 1000 --workers 4
//! loadgen sustained --parallel 500
//! loadgen history   --account 1 --side payee
//! ```
//!
//! `load` and `sustained` call the HTTP endpoint from `loadtest.endpoint`
//! (or `TRANSFER_ENDPOINT`), or an in-process service over the memory
//! store with `--local`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use occ_transfer::client::{HttpTransferClient, LocalClient, TransferClient};
use occ_transfer::config::AppConfig;
use occ_transfer::core_types::{AccountId, KeyScheme};
use occ_transfer::credentials;
use occ_transfer::harness::{
    AccountPool, AmountStrategy, LoadConfig, LoadTest, RunSummary, ShutdownSignal,
    SustainedConfig, run_sustained,
};
use occ_transfer::history;
use occ_transfer::logging::init_logging;
use occ_transfer::service::{TransferConfig, TransferRequest, TransferService};
use occ_transfer::setup::{self, AccountSetup};
use occ_transfer::store::{MemoryStore, PgStore, Store};

#[derive(Parser, Debug)]
#[command(name = "loadgen", version, about = "Load generator for the transfer service")]
struct Cli {
    /// Configuration environment, reads config/<env>.yaml
    #[arg(short, long, default_value = "dev", global = true)]
    env: String,

    /// Transfer endpoint base URL, overrides loadtest.endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Single transfer, prints balance, duration and retries
    Invoke {
        #[arg(long, default_value_t = 1)]
        payer: i64,
        #[arg(long, default_value_t = 2)]
        payee: i64,
        #[arg(long, default_value = "10")]
        amount: Decimal,
    },
    /// Create the schema and bulk-insert accounts
    Setup {
        /// Accounts the table should hold afterwards
        #[arg(long)]
        accounts: Option<u64>,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Starting balance, defaults to loadtest.starting_balance
        #[arg(long)]
        balance: Option<Decimal>,
        /// sequential | random
        #[arg(long)]
        key_scheme: Option<KeyScheme>,
        /// Delete existing accounts and transactions first
        #[arg(long)]
        reset: bool,
        /// Write every account id to this file afterwards
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Batched load test
    Load {
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Keep calls in flight until Ctrl-C
    Sustained {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Most recent transactions paid or received by an account
    History {
        #[arg(long)]
        account: AccountId,
        /// payer | payee
        #[arg(long, default_value = "payer")]
        side: history::Side,
        #[arg(long, default_value_t = history::DEFAULT_LIMIT)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Concurrent calls (per batch for `load`)
    #[arg(long)]
    parallel: Option<usize>,
    /// Pick from accounts 1..=N
    #[arg(long)]
    accounts: Option<u64>,
    /// Pick from the ids listed in this file instead
    #[arg(long)]
    accounts_file: Option<PathBuf>,
    /// Fixed amount (`5`) or uniform whole-unit range (`1..100`)
    #[arg(long, default_value = "1")]
    amount: AmountStrategy,
    /// Call an in-process service over the memory store
    #[arg(long)]
    local: bool,
}

impl PoolArgs {
    fn account_pool(&self, config: &AppConfig) -> anyhow::Result<AccountPool> {
        match &self.accounts_file {
            Some(path) => Ok(AccountPool::from_file(path)?),
            None => Ok(AccountPool::Range {
                count: self.accounts.unwrap_or(config.loadtest.accounts),
            }),
        }
    }
}

fn starting_balance(config: &AppConfig) -> anyhow::Result<Decimal> {
    Decimal::from_str(&config.loadtest.starting_balance)
        .context("loadtest.starting_balance is not a decimal")
}

fn http_client(config: &AppConfig) -> anyhow::Result<HttpTransferClient> {
    let client = HttpTransferClient::new(
        &config.loadtest.endpoint,
        Duration::from_secs(config.loadtest.connect_timeout_secs),
        Duration::from_secs(config.loadtest.request_timeout_secs),
    )?;
    tracing::info!(url = client.url(), "invoking remote endpoint");
    Ok(client)
}

/// In-process service over a memory store holding every account in `pool`
fn local_client(config: &AppConfig, pool: &AccountPool) -> anyhow::Result<(MemoryStore, LocalClient)> {
    let balance = starting_balance(config)?;
    let store = MemoryStore::new(config.store.max_connections as usize);
    match pool {
        AccountPool::Range { count } => {
            store.open_accounts(*count as usize, KeyScheme::Sequential, balance);
        }
        AccountPool::List(ids) => store.seed(ids.iter().map(|id| (*id, balance))),
    }
    let service = TransferService::new(
        Arc::new(store.clone()),
        TransferConfig::from(&config.transfer),
    );
    Ok((store, LocalClient::new(Arc::new(service))))
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<PgStore> {
    let provider = credentials::for_store(&config.store)?;
    PgStore::connect(&config.store, provider)
        .await
        .with_context(|| format!("connecting to {}", config.store.endpoint))
}

fn print_summary(summary: &RunSummary) {
    println!();
    print!("{summary}");
}

/// Total balance before and after a local run; transfers move money, they
/// never create or destroy it
fn report_conservation(store: &MemoryStore, before: Decimal) {
    let after = store.total_balance();
    println!();
    println!("Total balance before: {before}");
    println!("Total balance after:  {after}");
    if before != after {
        tracing::error!(%before, %after, "total balance changed during run");
        println!("WARNING: total balance changed");
    }
}

async fn invoke(config: &AppConfig, payer: i64, payee: i64, amount: Decimal) -> anyhow::Result<()> {
    let client = http_client(config)?;
    let request = TransferRequest::new(payer, payee, amount);
    println!("Invoking {} with {:?}", client.url(), request);

    let started = Instant::now();
    let response = client.invoke(&request).await?;
    let elapsed = started.elapsed();

    match (&response.balance, &response.error) {
        (Some(balance), _) => println!("Payer balance after transfer: {balance}"),
        (None, Some(error)) => println!(
            "Transfer failed: {error} ({})",
            response.error_code.as_deref().unwrap_or("-")
        ),
        (None, None) => anyhow::bail!("response carries neither balance nor error"),
    }
    if let Some(duration) = response.duration {
        println!("  Duration: {duration}ms");
    }
    if let Some(retries) = response.retries {
        println!("  Retries: {retries}");
    }
    println!("  Round trip: {}ms", elapsed.as_millis());

    if response.is_success() {
        Ok(())
    } else {
        anyhow::bail!("transfer did not succeed")
    }
}

async fn load(
    config: &AppConfig,
    iterations: Option<usize>,
    workers: Option<usize>,
    pool_args: &PoolArgs,
) -> anyhow::Result<()> {
    let accounts = pool_args.account_pool(config)?;
    let load = LoadConfig {
        iterations: iterations.unwrap_or(config.loadtest.iterations),
        parallel_calls: pool_args.parallel.unwrap_or(config.loadtest.parallel_calls),
        workers: workers.unwrap_or(config.loadtest.workers),
        accounts: accounts.clone(),
        amounts: pool_args.amount,
        show_progress: true,
    };
    println!(
        "Running {} iterations x {} calls on {} worker(s) over {} accounts",
        load.iterations,
        load.parallel_calls,
        load.workers,
        accounts.len()
    );

    let shutdown = Arc::new(ShutdownSignal::new());
    shutdown.install_ctrl_c();

    if pool_args.local {
        let (store, client) = local_client(config, &accounts)?;
        let before = store.total_balance();
        let summary = LoadTest::run(Arc::new(client), &load, shutdown).await?;
        print_summary(&summary);
        report_conservation(&store, before);
    } else {
        let summary = LoadTest::run(Arc::new(http_client(config)?), &load, shutdown).await?;
        print_summary(&summary);
    }
    Ok(())
}

async fn sustained(config: &AppConfig, duration: Option<u64>, pool_args: &PoolArgs) -> anyhow::Result<()> {
    let accounts = pool_args.account_pool(config)?;
    let sustained = SustainedConfig {
        parallel_calls: pool_args.parallel.unwrap_or(config.loadtest.parallel_calls),
        accounts: accounts.clone(),
        amounts: pool_args.amount,
        max_duration: duration.map(Duration::from_secs),
        show_progress: true,
    };
    println!(
        "Keeping {} calls in flight over {} accounts, Ctrl-C to stop",
        sustained.parallel_calls,
        accounts.len()
    );

    let shutdown = Arc::new(ShutdownSignal::new());
    shutdown.install_ctrl_c();

    if pool_args.local {
        let (store, client) = local_client(config, &accounts)?;
        let before = store.total_balance();
        let summary = run_sustained(Arc::new(client), &sustained, shutdown).await?;
        print_summary(&summary);
        report_conservation(&store, before);
    } else {
        let summary = run_sustained(Arc::new(http_client(config)?), &sustained, shutdown).await?;
        print_summary(&summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.env)?;
    if let Some(endpoint) = cli.endpoint {
        config.loadtest.endpoint = endpoint;
    }
    // The status line owns the terminal
    config.console = false;
    config.log_file = "loadgen.log".to_string();
    let _log_guard = init_logging(&config);
    tracing::info!(version = occ_transfer::build_version(), command = ?cli.command, "loadgen starting");

    match cli.command {
        Command::Invoke {
            payer,
            payee,
            amount,
        } => invoke(&config, payer, payee, amount).await,

        Command::Setup {
            accounts,
            workers,
            balance,
            key_scheme,
            reset,
            export,
        } => {
            let store = connect_store(&config).await?;
            let scheme = key_scheme.unwrap_or(config.store.key_scheme);
            let plan = AccountSetup {
                target: accounts.unwrap_or(config.loadtest.accounts),
                workers,
                starting_balance: match balance {
                    Some(balance) => balance,
                    None => starting_balance(&config)?,
                },
                scheme,
                reset,
                ..AccountSetup::default()
            };
            println!("Setting up {} accounts ({:?} keys)...", plan.target, scheme);
            let report = setup::run(store.pool(), &plan).await?;
            println!(
                "Inserted {} accounts ({} already present) in {:.2}s",
                report.inserted,
                report.existing,
                report.elapsed.as_secs_f64()
            );
            if let Some(path) = export {
                let written = setup::export_ids(store.pool(), scheme, &path).await?;
                println!("Wrote {} account ids to {}", written, path.display());
            }
            store.close().await;
            Ok(())
        }

        Command::Load {
            iterations,
            workers,
            pool,
        } => load(&config, iterations, workers, &pool).await,

        Command::Sustained { duration, pool } => sustained(&config, duration, &pool).await,

        Command::History {
            account,
            side,
            limit,
        } => {
            let store = connect_store(&config).await?;
            let records = history::recent(store.pool(), account, side, limit).await?;
            println!(
                "Found {} recent transactions with {} as {}:",
                records.len(),
                account,
                side
            );
            for (i, record) in records.iter().enumerate() {
                println!("  {}", history::format_record(i, record));
            }
            store.close().await;
            Ok(())
        }
    }
}
