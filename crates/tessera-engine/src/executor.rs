//! The engine executor.
//!
//! [`EngineExecutor`] drives exactly one [`EngineSession`] through
//! compile → start → execute → stop, and exposes single-node execution
//! through [`RunContext::node_id`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tessera_compiler::{GraphCompiler, with_server_resource};
use tessera_config::WorkflowDef;
use tessera_runtime::{ChannelNotifier, NodeRegistry, NoopNotifier, RunEvent};
use tessera_workflow::{GraphValidationError, Resource, RunContext, WorkflowGraph};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineStartError};
use crate::session::{EngineSession, Endpoints, SessionStatus};
use crate::stream::RunStream;

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
  /// Overrides the configured execution timeout.
  pub timeout: Option<Duration>,
  /// Correlation id for logs; a fresh uuid when absent.
  pub request_id: Option<String>,
}

/// Shape a terminal result for callers: strings and arrays pass through,
/// anything else is wrapped in a one-element array.
pub fn normalize_output(output: Value) -> Value {
  match output {
    Value::String(_) | Value::Array(_) => output,
    other => Value::Array(vec![other]),
  }
}

/// Orchestrates one engine session across its lifecycle.
pub struct EngineExecutor {
  registry: NodeRegistry,
  config: EngineConfig,
  compiler: GraphCompiler,
  session: Mutex<Arc<EngineSession>>,
}

impl EngineExecutor {
  pub fn new(registry: NodeRegistry, config: EngineConfig) -> Self {
    let session = Arc::new(EngineSession::new(registry.clone(), config.clone()));
    Self {
      registry,
      config,
      compiler: GraphCompiler::new(),
      session: Mutex::new(session),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// The session currently owned by this executor.
  pub fn session(&self) -> Arc<EngineSession> {
    self
      .session
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn session_id(&self) -> String {
    self.session().session_id().to_string()
  }

  /// Compile `def`, scoped to `ctx.node_id` when set.
  pub fn process_workflow(
    &self,
    def: &WorkflowDef,
    ctx: &RunContext,
  ) -> Result<WorkflowGraph, GraphValidationError> {
    self.compiler.compile(def, ctx.node_id.as_deref())
  }

  /// A copy of `resources` holding a server resource, adding a default one
  /// only when none exists.
  pub fn add_server_resource_if_needed(resources: &[Resource]) -> Vec<Resource> {
    with_server_resource(resources)
  }

  /// Start a session for `graph`.
  ///
  /// A session that is already starting or running is stopped first; a used
  /// session is replaced by a fresh one. A failed start is surfaced as is and
  /// never retried here.
  #[instrument(name = "start_engine", skip(self, graph), fields(graph_id = %graph.graph_id))]
  pub async fn start_engine(&self, graph: WorkflowGraph) -> Result<Endpoints, EngineStartError> {
    let current = self.session();

    if matches!(
      current.status(),
      SessionStatus::Starting | SessionStatus::Running
    ) {
      info!(session_id = %current.session_id(), "engine_restarting");
      current.stop().await;
    }

    let session = if current.status() == SessionStatus::Created {
      current
    } else {
      let fresh = Arc::new(EngineSession::new(
        self.registry.clone(),
        self.config.clone(),
      ));
      *self.session.lock().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
      fresh
    };

    session.start(graph).await
  }

  /// Run the graph with `inputs` and wait for its terminal result.
  pub async fn execute_sync_task(&self, inputs: Vec<Value>) -> Result<Value, EngineError> {
    self
      .execute_sync_task_with(inputs, TaskOptions::default())
      .await
  }

  /// [`execute_sync_task`](Self::execute_sync_task) with per-call options.
  pub async fn execute_sync_task_with(
    &self,
    inputs: Vec<Value>,
    options: TaskOptions,
  ) -> Result<Value, EngineError> {
    let session = self.session();
    if !session.is_running() {
      return Err(EngineError::NotRunning);
    }

    let timeout = options
      .timeout
      .unwrap_or_else(|| self.config.execution_timeout());
    let request_id = options
      .request_id
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let run = session.run(
      &request_id,
      inputs,
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    );

    match tokio::time::timeout(timeout, run).await {
      Ok(result) => result.map(normalize_output),
      Err(_) => {
        let timeout_ms = timeout.as_millis() as u64;
        warn!(request_id = %request_id, timeout_ms, "execution_timed_out");
        Err(EngineError::ExecutionTimeout { timeout_ms })
      }
    }
  }

  /// Run the graph with `inputs`, streaming events as nodes complete.
  pub async fn execute_stream_task(&self, inputs: Vec<Value>) -> Result<RunStream, EngineError> {
    self
      .execute_stream_task_with(inputs, TaskOptions::default())
      .await
  }

  /// [`execute_stream_task`](Self::execute_stream_task) with per-call options.
  pub async fn execute_stream_task_with(
    &self,
    inputs: Vec<Value>,
    options: TaskOptions,
  ) -> Result<RunStream, EngineError> {
    let session = self.session();
    if !session.is_running() {
      return Err(EngineError::NotRunning);
    }

    let timeout = options
      .timeout
      .unwrap_or_else(|| self.config.execution_timeout());
    let request_id = options
      .request_id
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (sender, receiver) = mpsc::unbounded_channel();
    let request = CancellationToken::new();
    let notifier = Arc::new(ChannelNotifier::new(sender.clone()));
    let token = request.clone();

    tokio::spawn(async move {
      let run = session.run(&request_id, inputs, notifier, token);
      let terminal = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => RunEvent::Finished {
          output: normalize_output(output),
        },
        Ok(Err(EngineError::Cancelled)) => {
          debug!(request_id = %request_id, "stream_abandoned");
          return;
        }
        Ok(Err(e)) => RunEvent::Failed {
          node_id: e.node_id().map(str::to_string),
          message: e.to_string(),
        },
        Err(_) => RunEvent::Failed {
          node_id: None,
          message: EngineError::ExecutionTimeout {
            timeout_ms: timeout.as_millis() as u64,
          }
          .to_string(),
        },
      };
      let _ = sender.send(terminal);
    });

    Ok(RunStream::new(receiver, request))
  }

  pub fn is_engine_running(&self) -> bool {
    self.session().is_running()
  }

  /// `{web_url, api_url}`, empty when the session is not running.
  pub fn get_engine_urls(&self) -> Endpoints {
    self.session().get_endpoints()
  }

  /// Stop the owned session. Idempotent.
  pub async fn stop_engine(&self) {
    self.session().stop().await;
  }
}

impl std::fmt::Debug for EngineExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EngineExecutor")
      .field("session", &self.session())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_normalize_output() {
    assert_eq!(normalize_output(json!("text")), json!("text"));
    assert_eq!(normalize_output(json!([1, 2])), json!([1, 2]));
    assert_eq!(normalize_output(json!(4)), json!([4]));
    assert_eq!(normalize_output(json!({"a": 1})), json!([{"a": 1}]));
  }

  #[test]
  fn test_add_server_resource_if_needed_never_mutates() {
    let resources = vec![Resource::server("srv")];
    let out = EngineExecutor::add_server_resource_if_needed(&resources);
    assert_eq!(out, resources);

    let out = EngineExecutor::add_server_resource_if_needed(&[]);
    assert_eq!(out.iter().filter(|r| r.is_server()).count(), 1);
  }
}
