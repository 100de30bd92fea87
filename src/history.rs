//! Transaction history lookup

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::core_types::{AccountId, TransactionRecord};
use crate::store::StoreError;
use crate::store::postgres::bind_account;

pub const DEFAULT_LIMIT: usize = 5;

const RECENT_BY_PAYER: &str = "SELECT id, payer_id, payee_id, amount, created_at \
     FROM transactions \
     WHERE payer_id = $1 \
     ORDER BY created_at DESC \
     LIMIT $2";

const RECENT_BY_PAYEE: &str = "SELECT id, payer_id, payee_id, amount, created_at \
     FROM transactions \
     WHERE payee_id = $1 \
     ORDER BY created_at DESC \
     LIMIT $2";

/// Which side of a transfer an account is looked up on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Side {
    #[default]
    Payer,
    Payee,
}

impl Side {
    fn query(self) -> &'static str {
        match self {
            Side::Payer => RECENT_BY_PAYER,
            Side::Payee => RECENT_BY_PAYEE,
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "payer" => Ok(Side::Payer),
            "payee" => Ok(Side::Payee),
            other => Err(format!("unknown side '{other}', expected payer or payee")),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Payer => "payer",
            Side::Payee => "payee",
        })
    }
}

fn account_column(row: &PgRow, column: &str, like: AccountId) -> Result<AccountId, sqlx::Error> {
    Ok(match like {
        AccountId::Seq(_) => AccountId::Seq(row.try_get::<i64, _>(column)?),
        AccountId::Uuid(_) => AccountId::Uuid(row.try_get::<Uuid, _>(column)?),
    })
}

fn decode(row: &PgRow, like: AccountId) -> Result<TransactionRecord, sqlx::Error> {
    Ok(TransactionRecord {
        id: row.try_get::<Uuid, _>("id")?,
        payer_id: account_column(row, "payer_id", like)?,
        payee_id: account_column(row, "payee_id", like)?,
        amount: row.try_get::<Decimal, _>("amount")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Latest `limit` transfers where `account` is on `side`, newest first.
/// Each side is served by its own `(<side>_id, created_at)` index.
pub async fn recent(
    pool: &PgPool,
    account: AccountId,
    side: Side,
    limit: usize,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let rows = bind_account(sqlx::query(side.query()), account)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| decode(row, account).map_err(StoreError::from))
        .collect()
}

pub async fn recent_by_payer(
    pool: &PgPool,
    payer: AccountId,
    limit: usize,
) -> Result<Vec<TransactionRecord>, StoreError> {
    recent(pool, payer, Side::Payer, limit).await
}

pub async fn recent_by_payee(
    pool: &PgPool,
    payee: AccountId,
    limit: usize,
) -> Result<Vec<TransactionRecord>, StoreError> {
    recent(pool, payee, Side::Payee, limit).await
}

/// One line per record for terminal output
pub fn format_record(index: usize, record: &TransactionRecord) -> String {
    format!(
        "{}. {} | {} -> {} | amount {} | {}",
        index + 1,
        record.id,
        record.payer_id,
        record.payee_id,
        record.amount,
        record.created_at.format("%Y-%m-%d %H:%M:%S%.3f")
    )
}
