//! Transfer endpoint clients
//!
//! The load generator only depends on [`TransferClient`]: "call the transfer
//! endpoint with this request and give me its response body". Two
//! implementations:
//!
//! - [`HttpTransferClient`]: remote endpoint over HTTP (reqwest)
//! - [`LocalClient`]: in-process service, no network hop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::gateway::types::{TransferBody, TransferResponse};
use crate::service::{TransferApi, TransferRequest};

#[derive(Error, Debug, Clone)]
pub enum InvokeError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for InvokeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InvokeError::Timeout(e.to_string())
        } else if e.is_builder() {
            InvokeError::Build(e.to_string())
        } else {
            InvokeError::Transport(e.to_string())
        }
    }
}

/// A callable transfer endpoint
#[async_trait]
pub trait TransferClient: Send + Sync + 'static {
    async fn invoke(&self, request: &TransferRequest) -> Result<TransferResponse, InvokeError>;

    /// Independent handle for a worker thread with its own runtime
    fn for_worker(&self) -> Result<Self, InvokeError>
    where
        Self: Sized;
}

/// HTTP client for a remote `POST /transfer` endpoint
#[derive(Clone)]
pub struct HttpTransferClient {
    http: reqwest::Client,
    endpoint: String,
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpTransferClient {
    /// `endpoint` is the service base URL, e.g. `http://10.0.0.5:8080`
    pub fn new(
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, InvokeError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            url: format!("{}/transfer", endpoint.trim_end_matches('/')),
            connect_timeout,
            request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn invoke(&self, request: &TransferRequest) -> Result<TransferResponse, InvokeError> {
        let response = self
            .http
            .post(&self.url)
            .json(&TransferBody::from(request))
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        // Failure bodies come back with 400/500 too; only a body we can't
        // read is a transport-level problem.
        match serde_json::from_slice::<TransferResponse>(&bytes) {
            Ok(body) if body.balance.is_some() || body.error.is_some() => Ok(body),
            Ok(_) | Err(_) if !status.is_success() => Err(InvokeError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
            }),
            Ok(_) => Err(InvokeError::Decode(
                "response has neither balance nor error".to_string(),
            )),
            Err(e) => Err(InvokeError::Decode(e.to_string())),
        }
    }

    fn for_worker(&self) -> Result<Self, InvokeError> {
        // Connection pools are bound to the runtime that opened them
        Self::new(
            &self.endpoint,
            self.connect_timeout,
            self.request_timeout,
        )
    }
}

/// Calls an in-process transfer service
#[derive(Clone)]
pub struct LocalClient {
    service: Arc<dyn TransferApi>,
}

impl LocalClient {
    pub fn new(service: Arc<dyn TransferApi>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TransferClient for LocalClient {
    async fn invoke(&self, request: &TransferRequest) -> Result<TransferResponse, InvokeError> {
        let telemetry = self.service.config().include_telemetry;
        Ok(match self.service.transfer(request.clone()).await {
            Ok(outcome) => TransferResponse::success(&outcome, telemetry),
            Err(failure) => TransferResponse::failure(&failure, telemetry),
        })
    }

    fn for_worker(&self) -> Result<Self, InvokeError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::AccountId;
    use crate::service::{TransferConfig, TransferService};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn local_client() -> (MemoryStore, LocalClient) {
        let store = MemoryStore::new(4);
        store.seed([
            (AccountId::Seq(1), Decimal::from(100)),
            (AccountId::Seq(2), Decimal::from(100)),
        ]);
        let service = TransferService::new(Arc::new(store.clone()), TransferConfig::default());
        (store, LocalClient::new(Arc::new(service)))
    }

    #[tokio::test]
    async fn test_local_client_reports_success_and_failure() {
        let (store, client) = local_client();

        let ok = client
            .invoke(&TransferRequest::new(1, 2, Decimal::from(10)))
            .await
            .unwrap();
        assert_eq!(ok.balance, Some(Decimal::from(90)));
        assert_eq!(ok.retries, Some(0));

        let err = client
            .invoke(&TransferRequest::new(1, 999, Decimal::from(10)))
            .await
            .unwrap();
        assert_eq!(err.error_code.as_deref(), Some("ACCOUNT_NOT_FOUND"));
        assert_eq!(store.total_balance(), Decimal::from(200));
    }

    #[test]
    fn test_http_client_url() {
        let client = HttpTransferClient::new(
            "http://localhost:8080/",
            Duration::from_secs(10),
            Duration::from_secs(120),
        )
        .unwrap();
        assert_eq!(client.url(), "http://localhost:8080/transfer");
        let worker = client.for_worker().unwrap();
        assert_eq!(worker.url(), "http://localhost:8080/transfer");
    }

    #[test]
    fn test_worker_client_keeps_endpoint_path() {
        let client = HttpTransferClient::new(
            "http://svc/transfer",
            Duration::from_secs(10),
            Duration::from_secs(120),
        )
        .unwrap();
        let worker = client.for_worker().unwrap();
        assert_eq!(client.url(), "http://svc/transfer/transfer");
        assert_eq!(worker.url(), client.url());
    }

    #[tokio::test]
    async fn test_http_client_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpTransferClient::new(
            &format!("http://{addr}"),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client
            .invoke(&TransferRequest::new(1, 2, Decimal::from(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Transport(_) | InvokeError::Timeout(_)));
    }
}
