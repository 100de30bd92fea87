//! HTTP gateway exposing the transfer service
//!
//! - `POST /transfer`
//! - `GET /health`
//! - `GET /docs` (Swagger UI, optional)

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::future::Future;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServerConfig;
pub use state::AppState;

/// Build the gateway router
pub fn router(state: AppState, swagger: bool) -> Router {
    let app = Router::new()
        .route("/transfer", post(handlers::transfer))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    if swagger {
        // Stateless, added after with_state
        app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
    } else {
        app
    }
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `server.host:server.port` and serve until `shutdown` resolves
pub async fn run_server<F>(server: &ServerConfig, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", server.host, server.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "failed to bind to {addr}: {e} (port {} may already be in use)",
            server.port
        )
    })?;

    tracing::info!(%addr, store = state.store_name, "transfer gateway listening");
    if server.swagger {
        tracing::info!("API docs: http://{addr}/docs");
    }

    serve(listener, router(state, server.swagger), shutdown).await?;
    tracing::info!("transfer gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use crate::core_types::AccountId;
    use crate::service::{
        TransferApi, TransferConfig, TransferFailure, TransferOutcome, TransferRequest,
        TransferService,
    };
    use crate::store::{MemoryStore, Store, StoreError};

    /// Service whose transfers always panic
    struct PanickingService {
        config: TransferConfig,
    }

    #[async_trait::async_trait]
    impl TransferApi for PanickingService {
        async fn transfer(
            &self,
            _request: TransferRequest,
        ) -> Result<TransferOutcome, TransferFailure> {
            panic!("transfer blew up")
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn config(&self) -> &TransferConfig {
            &self.config
        }
    }

    /// Serve a two-account memory store on an ephemeral port
    async fn spawn_app(config: TransferConfig) -> (MemoryStore, String) {
        let store = MemoryStore::new(4);
        store.seed([
            (AccountId::Seq(1), Decimal::from(100)),
            (AccountId::Seq(2), Decimal::from(100)),
        ]);
        let service = TransferService::new(Arc::new(store.clone()), config);
        let app = router(AppState::new(Arc::new(service), "memory"), false);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, app, std::future::pending()));
        (store, base)
    }

    async fn post_transfer(base: &str, body: &str) -> (u16, serde_json::Value) {
        let response = reqwest::Client::new()
            .post(format!("{base}/transfer"))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_transfer_success_body() {
        let (store, base) = spawn_app(TransferConfig::default()).await;
        let (status, json) =
            post_transfer(&base, r#"{"payer_id": 1, "payee_id": 2, "amount": 10}"#).await;

        assert_eq!(status, 200);
        assert_eq!(json["balance"], "90");
        assert_eq!(json["retries"], 0);
        assert!(json["duration"].is_u64());
        assert!(json.get("error").is_none());
        assert_eq!(store.balance(AccountId::Seq(2)), Some(Decimal::from(110)));
    }

    #[tokio::test]
    async fn test_business_failure_is_200() {
        let (_store, base) = spawn_app(TransferConfig::default()).await;
        let (status, json) =
            post_transfer(&base, r#"{"payer_id": 1, "payee_id": 2, "amount": "500"}"#).await;

        assert_eq!(status, 200);
        assert_eq!(json["errorCode"], "INSUFFICIENT_BALANCE");
        assert!(json.get("balance").is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let (_store, base) = spawn_app(TransferConfig::default()).await;
        let (status, json) = post_transfer(&base, r#"{"payer_id": 1,"#).await;
        assert_eq!(status, 400);
        assert_eq!(json["errorCode"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_telemetry_can_be_disabled() {
        let (_store, base) =
            spawn_app(TransferConfig::builder().include_telemetry(false).build()).await;
        let (_, json) =
            post_transfer(&base, r#"{"payer_id": 1, "payee_id": 2, "amount": 1}"#).await;
        assert!(json.get("duration").is_none());
        assert!(json.get("retries").is_none());
    }

    #[tokio::test]
    async fn test_panicking_transfer_is_500_internal() {
        let service = PanickingService {
            config: TransferConfig::default(),
        };
        let app = router(AppState::new(Arc::new(service), "memory"), false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, app, std::future::pending()));

        let (status, json) =
            post_transfer(&base, r#"{"payer_id": 1, "payee_id": 2, "amount": 1}"#).await;
        assert_eq!(status, 500);
        assert_eq!(json["errorCode"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_health() {
        let (store, base) = spawn_app(TransferConfig::default()).await;
        let url = format!("{base}/health");

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["store"], "memory");

        store.close().await;
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }
}
