//! PostgreSQL-protocol store

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode, Postgres,
};
use sqlx::query::{Query, QueryScalar};
use sqlx::Connection;
use tokio::task::JoinHandle;

use super::{Session, Store, StoreError};
use crate::config::StoreConfig;
use crate::core_types::{AccountId, TransactionRecord};
use crate::credentials::CredentialProvider;

/// Bind an account id under whichever key scheme it uses
pub(crate) fn bind_account<'q>(
    query: Query<'q, Postgres, PgArguments>,
    id: AccountId,
) -> Query<'q, Postgres, PgArguments> {
    match id {
        AccountId::Seq(id) => query.bind(id),
        AccountId::Uuid(id) => query.bind(id),
    }
}

fn bind_account_scalar<'q, O>(
    query: QueryScalar<'q, Postgres, O, PgArguments>,
    id: AccountId,
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    match id {
        AccountId::Seq(id) => query.bind(id),
        AccountId::Uuid(id) => query.bind(id),
    }
}

/// Pooled store over the PostgreSQL wire protocol
pub struct PgStore {
    pool: PgPool,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl PgStore {
    /// Open a bounded pool using credentials from `credentials`.
    ///
    /// When the credential expires, a background task swaps fresh connect
    /// options into the pool ahead of expiry so new connections keep
    /// authenticating. Existing connections are unaffected.
    pub async fn connect(
        config: &StoreConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StoreError> {
        let base = base_options(config)?;
        let credential = credentials
            .credential()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let expires_at = credential.expires_at;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(with_secret(&base, &credential.secret))
            .await?;

        tracing::info!(
            endpoint = %config.endpoint,
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );

        let store = Self::from_pool(pool);
        if expires_at.is_some() {
            let handle = tokio::spawn(refresh_credentials(
                store.pool.clone(),
                base,
                credentials,
                expires_at,
            ));
            if let Ok(mut slot) = store.refresher.lock() {
                *slot = Some(handle);
            }
        }
        Ok(store)
    }

    /// Wrap an existing pool (tests, tooling)
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            refresher: Mutex::new(None),
        }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn base_options(config: &StoreConfig) -> Result<PgConnectOptions, StoreError> {
    if let Some(url) = &config.url {
        return PgConnectOptions::from_str(url).map_err(StoreError::from);
    }
    let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(StoreError::from)?;
    Ok(PgConnectOptions::new()
        .host(&config.endpoint)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .ssl_mode(ssl_mode)
        .application_name("occ_transfer"))
}

/// An empty secret keeps whatever the base options carry (URL password,
/// trust auth)
fn with_secret(base: &PgConnectOptions, secret: &str) -> PgConnectOptions {
    if secret.is_empty() {
        base.clone()
    } else {
        base.clone().password(secret)
    }
}

/// Keep the pool's connect options one step ahead of credential expiry
async fn refresh_credentials(
    pool: PgPool,
    base: PgConnectOptions,
    credentials: Arc<dyn CredentialProvider>,
    mut expires_at: Option<chrono::DateTime<Utc>>,
) {
    const RETRY_AFTER: Duration = Duration::from_secs(10);
    let margin = chrono::Duration::minutes(5);

    while let Some(at) = expires_at {
        let wait = (at - margin - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        if pool.is_closed() {
            return;
        }

        match credentials.credential().await {
            Ok(credential) => {
                pool.set_connect_options(with_secret(&base, &credential.secret));
                tracing::info!(expires_at = ?credential.expires_at, "store credential rotated");
                expires_at = credential.expires_at;
            }
            Err(e) => {
                tracing::warn!(error = %e, "store credential refresh failed, retrying");
                tokio::time::sleep(RETRY_AFTER).await;
            }
        }
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn acquire(&self) -> Result<PgSession, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(PgSession {
            conn: Some(conn),
            in_tx: false,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.refresher.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }
}

/// One pooled connection with explicit transaction control.
///
/// A session dropped while a transaction is open (panic, cancelled future)
/// never goes back to the pool: the connection is detached and closed, and
/// the server rolls the transaction back when the socket goes away.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
    in_tx: bool,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Connection("session already released".to_string()))
    }

    async fn execute(&mut self, sql: &'static str) -> Result<(), StoreError> {
        sqlx::query(sql).execute(self.conn()?).await?;
        Ok(())
    }

    async fn adjust(
        &mut self,
        sql: &'static str,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let query = sqlx::query_scalar::<_, Decimal>(sql).bind(amount);
        let balance = bind_account_scalar(query, account)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(balance)
    }

    /// Whether a transaction was begun and not yet committed or rolled back
    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    /// Take the connection out of the pool for good and close it in the
    /// background
    fn close_detached(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let conn = conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        tracing::debug!(error = %e, "closing detached connection failed");
                    }
                });
            }
            // No runtime to close gracefully; dropping the socket is enough
            Err(_) => drop(conn),
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if self.in_tx {
            tracing::warn!(store = "postgres", "session dropped inside a transaction, closing connection");
            self.close_detached();
        }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> Result<(), StoreError> {
        // Set first: a BEGIN cancelled in flight may still have opened one
        self.in_tx = true;
        self.execute("BEGIN").await
    }

    async fn debit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        self.adjust(
            "UPDATE accounts SET balance = balance - $1 WHERE id = $2 RETURNING balance",
            account,
            amount,
        )
        .await
    }

    async fn credit(
        &mut self,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        self.adjust(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING balance",
            account,
            amount,
        )
        .await
    }

    async fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        let query = sqlx::query(
            "INSERT INTO transactions (id, payer_id, payee_id, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id);
        let query = bind_account(query, record.payer_id);
        let query = bind_account(query, record.payee_id);
        query
            .bind(record.amount)
            .bind(record.created_at)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        // A failed COMMIT still ends the transaction server-side
        self.execute("COMMIT").await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.execute("ROLLBACK").await?;
        self.in_tx = false;
        Ok(())
    }

    fn discard(mut self) {
        // Detached connections no longer count against the pool
        self.close_detached();
        self.in_tx = false;
        tracing::warn!(store = "postgres", "session discarded");
    }
}
