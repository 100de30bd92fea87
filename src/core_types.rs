//! Core types used throughout the system
//!
//! Accounts can be keyed two ways, and both live in the same data model:
//!
//! - **Sequential**: dense integers `1..=n`. Easy to generate with
//!   `generate_series`, easy to pick at random, but monotonically increasing
//!   keys concentrate inserts on one partition of a distributed store.
//! - **Random**: v4 UUIDs. Writes spread evenly across partitions, which is
//!   what a high-churn table (the transfer history) wants.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account identifier.
///
/// Serialized untagged: a JSON number for sequential keys, a UUID string for
/// random keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Seq(i64),
    Uuid(Uuid),
}

impl AccountId {
    /// Which key scheme produced this id
    pub fn scheme(&self) -> KeyScheme {
        match self {
            AccountId::Seq(_) => KeyScheme::Sequential,
            AccountId::Uuid(_) => KeyScheme::Random,
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Seq(id) => write!(f, "{}", id),
            AccountId::Uuid(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Ok(AccountId::Seq(id));
        }
        Uuid::parse_str(s)
            .map(AccountId::Uuid)
            .map_err(|_| format!("invalid account id: {s}"))
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId::Seq(id)
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        AccountId::Uuid(id)
    }
}

/// Primary-key strategy for the accounts table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// Dense integers starting at 1
    #[default]
    Sequential,
    /// Random v4 UUIDs
    Random,
}

impl KeyScheme {
    /// SQL column type for account ids under this scheme
    pub fn sql_type(&self) -> &'static str {
        match self {
            KeyScheme::Sequential => "BIGINT",
            KeyScheme::Random => "UUID",
        }
    }
}

impl FromStr for KeyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" | "int" => Ok(KeyScheme::Sequential),
            "random" | "uuid" => Ok(KeyScheme::Random),
            other => Err(format!("unknown key scheme: {other}")),
        }
    }
}

/// Append-only audit entry written in the same transaction as a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub payer_id: AccountId,
    pub payee_id: AccountId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(payer_id: AccountId, payee_id: AccountId, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            payer_id,
            payee_id,
            amount,
            created_at: Utc::now(),
        }
    }
}
