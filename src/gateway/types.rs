//! Wire types of the transfer endpoint
//!
//! Request:
//! ```json
//! { "payer_id": 1, "payee_id": 2, "amount": 10 }
//! ```
//! Ids are integers or UUID strings; amount is a number or a decimal string.
//!
//! Success:
//! ```json
//! { "balance": "90", "duration": 12, "retries": 0 }
//! ```
//! Failure:
//! ```json
//! { "error": "change conflicts ...", "errorCode": "40001", "duration": 95, "retries": 3 }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::AccountId;
use crate::service::{TransferFailure, TransferOutcome, TransferRequest};

/// Transfer request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransferBody {
    /// Account to debit (integer or UUID)
    #[schema(value_type = String, example = "1")]
    pub payer_id: AccountId,
    /// Account to credit (integer or UUID)
    #[schema(value_type = String, example = "2")]
    pub payee_id: AccountId,
    /// Positive amount
    #[schema(value_type = String, example = "10")]
    pub amount: Decimal,
}

impl From<TransferBody> for TransferRequest {
    fn from(body: TransferBody) -> Self {
        TransferRequest {
            payer_id: body.payer_id,
            payee_id: body.payee_id,
            amount: body.amount,
        }
    }
}

impl From<&TransferRequest> for TransferBody {
    fn from(req: &TransferRequest) -> Self {
        TransferBody {
            payer_id: req.payer_id,
            payee_id: req.payee_id,
            amount: req.amount,
        }
    }
}

/// Transfer response body. Exactly one of `balance` / `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransferResponse {
    /// Payer balance after the transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "90")]
    pub balance: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Store SQLSTATE for store errors (`40001` = conflict), otherwise a
    /// symbolic code
    #[serde(
        rename = "errorCode",
        alias = "error_code",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<String>,
    /// Server-side milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Conflict retries before the final outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl TransferResponse {
    pub fn success(outcome: &TransferOutcome, telemetry: bool) -> Self {
        Self {
            balance: Some(outcome.payer_balance),
            duration: telemetry.then(|| outcome.duration.as_millis() as u64),
            retries: telemetry.then_some(outcome.retries),
            ..Self::default()
        }
    }

    pub fn failure(failure: &TransferFailure, telemetry: bool) -> Self {
        Self {
            error: Some(failure.error.to_string()),
            error_code: Some(failure.error.code().to_string()),
            duration: telemetry.then(|| failure.duration.as_millis() as u64),
            retries: telemetry.then_some(failure.retries),
            ..Self::default()
        }
    }

    /// Failure body produced by the gateway itself (no service work done)
    pub fn rejected(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_code: Some(code.into()),
            duration: Some(0),
            retries: Some(0),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.balance.is_some()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    /// Build identifier
    #[schema(example = "0.1.0+1a2b3c4")]
    pub version: String,
    pub store: String,
}
