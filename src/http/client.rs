//! HTTP client for the coordinator RPC surface
//!
//! Used by worker processes and by the fleet supervisor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::coordinator::{
    Assignment, ClientId, ClientRequest, CoordinatorApi, LivenessSnapshot, ReportDoneRequest,
};
use crate::models::ItemResult;

/// RPC transport errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Coordinator rejected {call} ({status}): {message}")]
    Rejected {
        call: String,
        status: u16,
        message: String,
    },
}

impl RpcError {
    /// The coordinator answered but refused the call
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Rejected { .. })
    }
}

/// RPC client for a coordinator at a known host and port
#[derive(Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl CoordinatorClient {
    /// Create client with custom timeout
    pub fn with_timeout(host: &str, port: u16, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("http://{host}:{port}"),
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, call: &str, request: RequestBuilder) -> Result<T> {
        debug!("RPC {} to {}", call, self.base_url);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(RpcError::Timeout(self.timeout_secs))
            } else if e.is_connect() {
                anyhow::anyhow!(RpcError::ConnectionRefused(self.base_url.clone()))
            } else {
                anyhow::anyhow!(RpcError::RequestFailed(e.to_string()))
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|m| m.as_str())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or(""))
                .to_string();
            return Err(RpcError::Rejected {
                call: call.to_string(),
                status: status.as_u16(),
                message,
            }
            .into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode {call} response"))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, call: &str, body: &B) -> Result<T> {
        let request = self.client.post(self.url(&format!("/rpc/{call}"))).json(body);
        self.send(call, request).await
    }

    async fn get<T: DeserializeOwned>(&self, call: &str, path: &str) -> Result<T> {
        let request = self.client.get(self.url(path));
        self.send(call, request).await
    }
}

#[async_trait]
impl CoordinatorApi for CoordinatorClient {
    async fn connect(&self, client_id: ClientId) -> Result<()> {
        let _: serde_json::Value = self.post("connect", &ClientRequest { client_id }).await?;
        Ok(())
    }

    async fn get_item(&self, client_id: ClientId) -> Result<Assignment> {
        self.post("get_item", &ClientRequest { client_id }).await
    }

    async fn report_done(&self, client_id: ClientId, result: ItemResult) -> Result<()> {
        let body = ReportDoneRequest { client_id, result };
        let _: serde_json::Value = self.post("report_done", &body).await?;
        Ok(())
    }

    async fn heartbeat(&self, client_id: ClientId) -> Result<()> {
        let _: serde_json::Value = self.post("heartbeat", &ClientRequest { client_id }).await?;
        Ok(())
    }

    async fn report_disconnect(&self, client_id: ClientId) -> Result<()> {
        let _: serde_json::Value = self
            .post("report_disconnect", &ClientRequest { client_id })
            .await?;
        Ok(())
    }

    async fn liveness_snapshot(&self) -> Result<LivenessSnapshot> {
        self.get("liveness", "/rpc/liveness").await
    }

    async fn no_more_work(&self) -> Result<bool> {
        self.get("no_more_work", "/rpc/no_more_work").await
    }

    async fn probe(&self) -> Result<()> {
        let _: serde_json::Value = self.get("health", "/health").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{server, Coordinator, SchedulerState};
    use crate::models::ItemId;
    use crate::utils::SystemClock;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn start_server(n: usize) -> (CoordinatorClient, Arc<Coordinator>, oneshot::Sender<()>) {
        let ids = (0..n)
            .map(|i| ItemId::new("suite.py", format!("test_{i}"), ""))
            .collect();
        let coordinator = Arc::new(Coordinator::new(
            SchedulerState::new("http", ids, false),
            Arc::new(SystemClock),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, coordinator.clone(), async move {
            let _ = rx.await;
        }));

        let client = CoordinatorClient::with_timeout("127.0.0.1", port, 5).unwrap();
        (client, coordinator, tx)
    }

    #[tokio::test]
    async fn test_full_protocol_over_http() {
        let (client, coordinator, _shutdown) = start_server(1).await;

        client.probe().await.unwrap();
        client.connect(4).await.unwrap();
        assert!(client.liveness_snapshot().await.unwrap().contains_key(&4));

        let item = match client.get_item(4).await.unwrap() {
            Assignment::Item { item } => item,
            other => panic!("expected item, got {other:?}"),
        };
        assert_eq!(item.function, "test_0");
        assert_eq!(client.get_item(5).await.unwrap(), Assignment::Pending);

        client.heartbeat(4).await.unwrap();
        client
            .report_done(4, ItemResult::failure(3, json!({"message": "nope"})))
            .await
            .unwrap();
        assert!(client.no_more_work().await.unwrap());

        assert_eq!(client.get_item(4).await.unwrap(), Assignment::End);
        client.report_disconnect(5).await.unwrap();
        assert!(coordinator.is_finished());

        let results = coordinator.results();
        assert_eq!(
            results.records[0].result.as_ref().unwrap().failures[0]["message"],
            "nope"
        );
    }

    #[tokio::test]
    async fn test_protocol_violation_maps_to_rejection() {
        let (client, _coordinator, _shutdown) = start_server(1).await;
        client.connect(1).await.unwrap();

        let err = client
            .report_done(1, ItemResult::success(1))
            .await
            .unwrap_err();
        let rpc = err.downcast_ref::<RpcError>().unwrap();
        assert!(rpc.is_rejection());
        assert!(matches!(rpc, RpcError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_from_reaped_client_is_rejected() {
        let (client, coordinator, _shutdown) = start_server(1).await;
        client.connect(2).await.unwrap();
        client.get_item(2).await.unwrap();
        client.report_disconnect(2).await.unwrap();

        let err = client.heartbeat(2).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::Rejected { status: 409, .. })
        ));
        assert!(coordinator.liveness_snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_coordinator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = CoordinatorClient::with_timeout("127.0.0.1", port, 2).unwrap();
        let err = client.probe().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::ConnectionRefused(_))
        ));
    }
}
