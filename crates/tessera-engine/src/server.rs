//! HTTP endpoints of a running session.
//!
//! - `GET /` session info
//! - `GET /health` liveness
//! - `POST /api/run` with `{"inputs": [...]}` runs the graph synchronously

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tessera_runtime::{NoopNotifier, Runtime, RuntimeError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::normalize_output;

#[derive(Clone)]
pub(crate) struct ServerState {
  pub session_id: String,
  pub runtime: Arc<Runtime>,
  /// Session token; requests run under children of it.
  pub cancel: CancellationToken,
  pub execution_timeout: Duration,
}

pub(crate) fn router(state: ServerState) -> Router {
  Router::new()
    .route("/", get(session_info))
    .route("/health", get(health))
    .route("/api/run", post(run))
    .with_state(state)
}

async fn session_info(State(state): State<ServerState>) -> Json<Value> {
  let workflow = state.runtime.workflow();
  Json(json!({
    "session_id": state.session_id,
    "graph_id": workflow.graph_id,
    "name": workflow.name,
    "nodes": workflow.nodes.len(),
    "status": "running",
  }))
}

async fn health() -> &'static str {
  "ok"
}

#[derive(Debug, Deserialize)]
struct RunRequest {
  #[serde(default)]
  inputs: Vec<Value>,
}

async fn run(
  State(state): State<ServerState>,
  Json(request): Json<RunRequest>,
) -> (StatusCode, Json<Value>) {
  let run_id = uuid::Uuid::new_v4().to_string();
  debug!(session_id = %state.session_id, run_id = %run_id, "api_run");

  let invoke = state.runtime.invoke(
    &run_id,
    request.inputs,
    Arc::new(NoopNotifier),
    state.cancel.child_token(),
  );

  match tokio::time::timeout(state.execution_timeout, invoke).await {
    Ok(Ok(output)) => (
      StatusCode::OK,
      Json(json!({ "output": normalize_output(output) })),
    ),
    Ok(Err(RuntimeError::NodeFailed { node_id, source })) => (
      StatusCode::UNPROCESSABLE_ENTITY,
      Json(json!({ "error": source.to_string(), "node_id": node_id })),
    ),
    Ok(Err(e)) => (
      StatusCode::SERVICE_UNAVAILABLE,
      Json(json!({ "error": e.to_string() })),
    ),
    Err(_) => (
      StatusCode::GATEWAY_TIMEOUT,
      Json(json!({ "error": "execution timed out" })),
    ),
  }
}
