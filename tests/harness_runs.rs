use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use occ_transfer::client::{HttpTransferClient, InvokeError, LocalClient, TransferClient};
use occ_transfer::gateway::types::TransferResponse;
use occ_transfer::harness::{
    AccountPool, AmountStrategy, LoadConfig, LoadTest, ShutdownSignal, SustainedConfig,
    run_sustained,
};
use occ_transfer::service::{TransferConfig, TransferRequest, TransferService};
use occ_transfer::store::MemoryStore;
use occ_transfer::{AccountId, KeyScheme};

/// Replays canned responses in order, whatever the request
#[derive(Clone)]
struct ScriptedClient {
    script: Arc<Mutex<VecDeque<TransferResponse>>>,
}

impl ScriptedClient {
    fn new(responses: impl IntoIterator<Item = TransferResponse>) -> Self {
        Self {
            script: Arc::new(Mutex::new(responses.into_iter().collect())),
        }
    }
}

#[async_trait]
impl TransferClient for ScriptedClient {
    async fn invoke(&self, _request: &TransferRequest) -> Result<TransferResponse, InvokeError> {
        tokio::task::yield_now().await;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InvokeError::Transport("script exhausted".to_string()))
    }

    fn for_worker(&self) -> Result<Self, InvokeError> {
        Ok(self.clone())
    }
}

fn success(retries: u32) -> TransferResponse {
    TransferResponse {
        balance: Some(Decimal::from(50)),
        duration: Some(4 + retries as u64 * 10),
        retries: Some(retries),
        ..TransferResponse::default()
    }
}

fn failure(error: &str, code: &str) -> TransferResponse {
    TransferResponse {
        error: Some(error.to_string()),
        error_code: Some(code.to_string()),
        duration: Some(2),
        retries: Some(0),
        ..TransferResponse::default()
    }
}

fn load_config(iterations: usize, parallel_calls: usize, workers: usize, accounts: u64) -> LoadConfig {
    LoadConfig {
        iterations,
        parallel_calls,
        workers,
        accounts: AccountPool::Range { count: accounts },
        amounts: AmountStrategy::default(),
        show_progress: false,
    }
}

/// Memory store with `accounts` dense accounts and a local client over it
fn local_service(accounts: usize, balance: i64, config: TransferConfig) -> (MemoryStore, LocalClient) {
    let store = MemoryStore::new(16);
    store.open_accounts(accounts, KeyScheme::Sequential, Decimal::from(balance));
    let service = TransferService::new(Arc::new(store.clone()), config);
    (store, LocalClient::new(Arc::new(service)))
}

fn retrying() -> TransferConfig {
    TransferConfig::builder()
        .max_retries(200)
        .backoff(Duration::from_millis(1), Duration::from_millis(20))
        .build()
}

#[tokio::test]
async fn qa_harness_aggregates_mixed_outcomes() {
    let mut responses: Vec<TransferResponse> = Vec::new();
    responses.extend((0..90).map(|_| success(0)));
    responses.extend((0..8).map(|_| success(1)));
    responses.push(failure("Insufficient balance in account 3: 0", "INSUFFICIENT_BALANCE"));
    responses.push(failure("Account not found: 7", "ACCOUNT_NOT_FOUND"));

    let client = Arc::new(ScriptedClient::new(responses));
    let summary = LoadTest::run(client, &load_config(1, 100, 1, 10), Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    let stats = &summary.stats;
    assert_eq!(stats.calls, 100);
    assert_eq!(stats.success, 98);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.conflict_errors, 0);
    assert_eq!(stats.total_retries, 8);
    assert_eq!(stats.max_retries, 1);
    assert_eq!(stats.calls_with_retries, 8);
    assert_eq!(stats.min_latency_ms, Some(2));
    assert_eq!(stats.max_latency_ms, 14);
    assert_eq!(stats.error_kinds.len(), 2);
    assert!(!summary.interrupted);

    let report = summary.to_string();
    assert!(report.contains("Transactions with retries: 8 (8.00%)"));
}

#[tokio::test]
async fn qa_harness_counts_conflicts_separately() {
    let conflict = "change conflicts with another transaction, please retry: (OC000)";
    let responses = vec![success(0), failure(conflict, "40001"), failure(conflict, "40001")];

    let client = Arc::new(ScriptedClient::new(responses));
    let summary = LoadTest::run(client, &load_config(1, 3, 1, 2), Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    assert_eq!(summary.stats.conflict_errors, 2);
    assert_eq!(summary.stats.sorted_errors(), vec![(format!("{conflict} (40001)").as_str(), 2)]);
}

#[tokio::test]
async fn qa_multi_worker_totals_match_plan() {
    let client = Arc::new(ScriptedClient::new((0..600).map(|_| success(0))));
    let summary = LoadTest::run(client, &load_config(3, 200, 4, 10), Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    assert_eq!(summary.planned_calls, 600);
    assert_eq!(summary.stats.calls, 600);
    assert_eq!(summary.stats.success, 600);
}

#[tokio::test]
async fn qa_multi_worker_conserves_money_on_memory_store() {
    let (store, client) = local_service(20, 100, retrying());
    let before = store.total_balance();

    let mut config = load_config(5, 200, 4, 20);
    config.amounts = AmountStrategy::Uniform { min: 1, max: 10 };
    let summary = LoadTest::run(Arc::new(client), &config, Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    let stats = &summary.stats;
    assert_eq!(stats.calls, 1000);
    assert_eq!(stats.success + stats.errors, 1000);
    assert_eq!(store.total_balance(), before);
    assert_eq!(store.history().len() as u64, stats.success);
    for id in 1..=20 {
        assert!(store.balance(AccountId::Seq(id)).unwrap() >= Decimal::ZERO);
    }
    // Every failure is a business outcome, never a store fault
    for (key, _) in stats.sorted_errors() {
        assert!(key.contains("INSUFFICIENT_BALANCE"), "unexpected error {key}");
    }
}

#[tokio::test]
async fn qa_uuid_pool_from_file() {
    let store = MemoryStore::new(8);
    let ids = store.open_accounts(5, KeyScheme::Random, Decimal::from(100));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    {
        use std::io::Write;
        writeln!(file, "# generated").unwrap();
        for id in &ids {
            writeln!(file, "{id}").unwrap();
        }
    }
    let accounts = AccountPool::from_file(file.path()).unwrap();
    assert_eq!(accounts.len(), 5);

    let service = TransferService::new(Arc::new(store.clone()), retrying());
    let client = Arc::new(LocalClient::new(Arc::new(service)));
    let config = LoadConfig {
        accounts,
        ..load_config(2, 10, 1, 0)
    };
    let summary = LoadTest::run(client, &config, Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    assert_eq!(summary.stats.success, 20);
    assert_eq!(store.total_balance(), Decimal::from(500));
    assert!(store.history().iter().all(|r| ids.contains(&r.payer_id)));
}

#[tokio::test]
async fn qa_shutdown_before_start_runs_nothing() {
    let shutdown = Arc::new(ShutdownSignal::new());
    shutdown.request_shutdown();

    let client = Arc::new(ScriptedClient::new((0..10).map(|_| success(0))));
    let summary = LoadTest::run(client, &load_config(5, 2, 1, 4), shutdown).await.unwrap();

    assert_eq!(summary.stats.calls, 0);
    assert!(summary.interrupted);
    assert!(summary.to_string().contains("Interrupted after 0 of 10 planned calls"));
}

#[tokio::test]
async fn qa_invalid_config_is_rejected() {
    let client = Arc::new(ScriptedClient::new([]));
    let err = LoadTest::run(client, &load_config(1, 10, 1, 1), Arc::new(ShutdownSignal::new()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("at least 2 distinct accounts"));
}

#[tokio::test]
async fn qa_transport_failures_are_counted_not_fatal() {
    // Bind then drop to get a port nothing listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = HttpTransferClient::new(
        &format!("http://{addr}"),
        Duration::from_secs(1),
        Duration::from_secs(2),
    )
    .unwrap();

    let summary = LoadTest::run(Arc::new(client), &load_config(2, 3, 1, 10), Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    assert_eq!(summary.stats.calls, 6);
    assert_eq!(summary.stats.errors, 6);
    let errors = summary.stats.sorted_errors();
    assert!(errors.iter().all(|(key, _)| key.starts_with("invocation failed: ")));
}

#[tokio::test]
async fn qa_sustained_keeps_slots_full_until_deadline() {
    let (store, client) = local_service(10, 1_000_000, retrying());
    let config = SustainedConfig {
        parallel_calls: 8,
        accounts: AccountPool::Range { count: 10 },
        amounts: AmountStrategy::Fixed(Decimal::ONE),
        max_duration: Some(Duration::from_millis(300)),
        show_progress: false,
    };

    let summary = run_sustained(Arc::new(client), &config, Arc::new(ShutdownSignal::new()))
        .await
        .unwrap();

    assert!(summary.stats.calls >= 8, "only {} calls", summary.stats.calls);
    assert_eq!(summary.stats.errors, 0);
    assert_eq!(summary.stats.calls, summary.planned_calls);
    assert_eq!(store.total_balance(), Decimal::from(10_000_000));
    assert_eq!(store.history().len() as u64, summary.stats.success);
}

#[tokio::test]
async fn qa_sustained_stops_on_shutdown() {
    let client = Arc::new(ScriptedClient::new((0..10_000).map(|_| success(0))));
    let shutdown = Arc::new(ShutdownSignal::new());
    let config = SustainedConfig {
        parallel_calls: 4,
        accounts: AccountPool::Range { count: 10 },
        amounts: AmountStrategy::default(),
        max_duration: None,
        show_progress: false,
    };

    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        stopper.request_shutdown();
    });

    let summary = run_sustained(client, &config, shutdown).await.unwrap();
    assert!(summary.stats.success > 0);
    assert!(summary.elapsed < Duration::from_secs(5));
}
