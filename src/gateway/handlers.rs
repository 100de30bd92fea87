//! Transfer endpoint handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

use super::state::AppState;
use super::types::{HealthResponse, TransferBody, TransferResponse};
use crate::service::{TransferError, TransferFailure, TransferRequest};

/// Move funds between two accounts
///
/// Business and store failures (insufficient balance, missing account,
/// conflicts after the retry budget) are reported with 200 and a failure
/// body. Only unexpected application errors return 500.
#[utoipa::path(
    post,
    path = "/transfer",
    request_body = TransferBody,
    responses(
        (status = 200, description = "Transfer committed or failed cleanly", body = TransferResponse),
        (status = 400, description = "Malformed request body", body = TransferResponse),
        (status = 500, description = "Internal error", body = TransferResponse)
    ),
    tag = "Transfer"
)]
pub async fn transfer(
    State(state): State<AppState>,
    body: Result<Json<TransferBody>, JsonRejection>,
) -> (StatusCode, Json<TransferResponse>) {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejected transfer request");
            return (
                StatusCode::BAD_REQUEST,
                Json(TransferResponse::rejected(
                    rejection.body_text(),
                    "INVALID_REQUEST",
                )),
            );
        }
    };

    let telemetry = state.transfers.config().include_telemetry;
    let transfers = state.transfers.clone();
    let request: TransferRequest = body.into();

    // A panic inside the service must not take the connection task down
    // with it; it becomes an Internal error instead.
    let result = match tokio::spawn(async move { transfers.transfer(request).await }).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(error = %join_err, "transfer task failed");
            Err(TransferFailure {
                error: TransferError::Internal(join_err.to_string()),
                retries: 0,
                duration: Default::default(),
            })
        }
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(TransferResponse::success(&outcome, telemetry)),
        ),
        Err(failure) => {
            let status = StatusCode::from_u16(failure.error.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(TransferResponse::failure(&failure, telemetry)))
        }
    }
}

/// Health check endpoint
///
/// Pings the store.
/// - Healthy: 200 OK + `{"status": "ok"}`
/// - Unhealthy: 503 Service Unavailable + `{"status": "unavailable"}`
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = HealthResponse)
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = match state.transfers.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(store = state.store_name, error = %e, "[HEALTH] store ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: crate::build_version().to_string(),
            store: state.store_name.to_string(),
        }),
    )
}
