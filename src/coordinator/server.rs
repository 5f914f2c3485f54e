//! HTTP RPC endpoint for the coordinator.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::{
    Assignment, ClientRequest, Coordinator, CoordinatorApi, CoordinatorError, LivenessSnapshot,
    ReportDoneRequest,
};

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let rpc = Router::new()
        .route("/connect", post(connect))
        .route("/get_item", post(get_item))
        .route("/report_done", post(report_done))
        .route("/heartbeat", post(heartbeat))
        .route("/report_disconnect", post(report_disconnect))
        .route("/liveness", get(liveness))
        .route("/no_more_work", get(no_more_work));

    Router::new()
        .route("/health", get(health))
        .nest("/rpc", rpc)
        .with_state(coordinator)
}

/// Serve RPCs on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Coordinator listening on {}", addr);
    }
    axum::serve(listener, build_router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await?;
    debug!("Exiting server loop");
    Ok(())
}

// ─── Errors ──────────────────────────────────────────────────────

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::NotAssigned(_) | CoordinatorError::UnknownClient(_) => {
                StatusCode::CONFLICT
            }
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Wraps any failure from the coordinator into an HTTP error
struct RpcFailure(anyhow::Error);

impl From<anyhow::Error> for RpcFailure {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for RpcFailure {
    fn into_response(self) -> Response {
        match self.0.downcast::<CoordinatorError>() {
            Ok(err) => err.into_response(),
            Err(err) => {
                let body = serde_json::json!({ "error": err.to_string() });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

type RpcResult<T> = Result<Json<T>, RpcFailure>;

// ─── Handlers ────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn connect(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ClientRequest>,
) -> RpcResult<serde_json::Value> {
    coordinator.connect(req.client_id).await?;
    Ok(Json(serde_json::json!({})))
}

async fn get_item(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ClientRequest>,
) -> RpcResult<Assignment> {
    Ok(Json(coordinator.get_item(req.client_id).await?))
}

async fn report_done(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportDoneRequest>,
) -> RpcResult<serde_json::Value> {
    coordinator.report_done(req.client_id, req.result).await?;
    Ok(Json(serde_json::json!({})))
}

async fn heartbeat(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ClientRequest>,
) -> RpcResult<serde_json::Value> {
    coordinator.heartbeat(req.client_id).await?;
    Ok(Json(serde_json::json!({})))
}

async fn report_disconnect(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ClientRequest>,
) -> RpcResult<serde_json::Value> {
    coordinator.report_disconnect(req.client_id).await?;
    Ok(Json(serde_json::json!({})))
}

async fn liveness(State(coordinator): State<Arc<Coordinator>>) -> RpcResult<LivenessSnapshot> {
    Ok(Json(coordinator.liveness_snapshot().await?))
}

async fn no_more_work(State(coordinator): State<Arc<Coordinator>>) -> RpcResult<bool> {
    Ok(Json(coordinator.no_more_work().await?))
}
