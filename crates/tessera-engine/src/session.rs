//! Engine sessions.
//!
//! An [`EngineSession`] owns one live instantiation of a compiled graph: the
//! runtime with its prepared node executors and the HTTP endpoints serving it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_runtime::{ExecutionNotifier, NodeRegistry, Runtime, RuntimeError};
use tessera_workflow::WorkflowGraph;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineStartError};
use crate::server::{self, ServerState};

/// How long `stop` waits for the endpoint server to drain.
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
  Created,
  Starting,
  Running,
  Stopping,
  Stopped,
  Failed,
}

impl fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SessionStatus::Created => "created",
      SessionStatus::Starting => "starting",
      SessionStatus::Running => "running",
      SessionStatus::Stopping => "stopping",
      SessionStatus::Stopped => "stopped",
      SessionStatus::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// Network endpoints of a running session. Both are empty until `Running`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
  pub web_url: String,
  pub api_url: String,
}

impl Endpoints {
  pub fn is_empty(&self) -> bool {
    self.web_url.is_empty() && self.api_url.is_empty()
  }
}

struct SessionInner {
  status: SessionStatus,
  endpoints: Endpoints,
  runtime: Option<Arc<Runtime>>,
  server: Option<JoinHandle<()>>,
}

/// Everything `start` acquires.
struct Provisioned {
  runtime: Arc<Runtime>,
  endpoints: Endpoints,
  server: JoinHandle<()>,
}

/// One live instantiation of a compiled graph.
///
/// All methods take `&self`; state lives behind a mutex that is never held
/// across an await, so `is_running` and `stop` are safe to call while a start
/// or an execution is in flight.
pub struct EngineSession {
  session_id: String,
  registry: NodeRegistry,
  config: EngineConfig,
  /// Cancelled by `stop`; every request runs under a child of it.
  cancel: CancellationToken,
  inner: Mutex<SessionInner>,
}

impl EngineSession {
  pub fn new(registry: NodeRegistry, config: EngineConfig) -> Self {
    Self {
      session_id: uuid::Uuid::new_v4().to_string(),
      registry,
      config,
      cancel: CancellationToken::new(),
      inner: Mutex::new(SessionInner {
        status: SessionStatus::Created,
        endpoints: Endpoints::default(),
        runtime: None,
        server: None,
      }),
    }
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  pub fn status(&self) -> SessionStatus {
    self.inner().status
  }

  fn inner(&self) -> MutexGuard<'_, SessionInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Instantiate `graph` and bind the session endpoints.
  ///
  /// Blocks until the session is `Running` or has failed, bounded by the
  /// configured start timeout. Only valid on a `Created` session.
  #[instrument(
    name = "session_start",
    skip(self, graph),
    fields(session_id = %self.session_id, graph_id = %graph.graph_id)
  )]
  pub async fn start(&self, graph: WorkflowGraph) -> Result<Endpoints, EngineStartError> {
    {
      let mut inner = self.inner();
      if inner.status != SessionStatus::Created {
        return Err(EngineStartError::InvalidState {
          status: inner.status,
        });
      }
      inner.status = SessionStatus::Starting;
    }

    info!(session_id = %self.session_id, "session_starting");

    let timeout_ms = self.config.start_timeout_ms;
    let outcome = tokio::select! {
      result = tokio::time::timeout(self.config.start_timeout(), self.provision(graph)) => {
        result.unwrap_or(Err(EngineStartError::Timeout { timeout_ms }))
      }
      _ = self.cancel.cancelled() => Err(EngineStartError::Aborted),
    };

    let mut inner = self.inner();
    match outcome {
      Ok(provisioned) if inner.status == SessionStatus::Starting => {
        inner.status = SessionStatus::Running;
        inner.endpoints = provisioned.endpoints.clone();
        inner.runtime = Some(provisioned.runtime);
        inner.server = Some(provisioned.server);
        info!(
          session_id = %self.session_id,
          web_url = %provisioned.endpoints.web_url,
          api_url = %provisioned.endpoints.api_url,
          "session_started"
        );
        Ok(provisioned.endpoints)
      }
      Ok(provisioned) => {
        // stopped while the last step completed
        provisioned.server.abort();
        Err(EngineStartError::Aborted)
      }
      Err(e) => {
        if inner.status == SessionStatus::Starting {
          inner.status = SessionStatus::Failed;
        }
        drop(inner);
        self.cancel.cancel();
        error!(session_id = %self.session_id, error = %e, "session_start_failed");
        Err(e)
      }
    }
  }

  async fn provision(&self, graph: WorkflowGraph) -> Result<Provisioned, EngineStartError> {
    let runtime = Arc::new(Runtime::new(graph, &self.registry)?);
    runtime.prepare().await?;

    let listener = TcpListener::bind((self.config.bind_host.as_str(), 0))
      .await
      .map_err(|source| EngineStartError::Bind { source })?;
    let addr = listener
      .local_addr()
      .map_err(|source| EngineStartError::Bind { source })?;

    let router = server::router(ServerState {
      session_id: self.session_id.clone(),
      runtime: runtime.clone(),
      cancel: self.cancel.clone(),
      execution_timeout: self.config.execution_timeout(),
    });

    let shutdown = self.cancel.clone();
    let session_id = self.session_id.clone();
    let server = tokio::spawn(async move {
      let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
      if let Err(e) = result {
        error!(session_id = %session_id, error = %e, "session_server_failed");
      }
    });

    Ok(Provisioned {
      runtime,
      endpoints: Endpoints {
        web_url: format!("http://{}", addr),
        api_url: format!("http://{}/api/run", addr),
      },
      server,
    })
  }

  /// Non-blocking liveness probe.
  pub fn is_running(&self) -> bool {
    self.inner().status == SessionStatus::Running && !self.cancel.is_cancelled()
  }

  /// The session endpoints, or empty strings when not `Running`.
  pub fn get_endpoints(&self) -> Endpoints {
    let inner = self.inner();
    if inner.status == SessionStatus::Running {
      inner.endpoints.clone()
    } else {
      Endpoints::default()
    }
  }

  /// Release everything `start` acquired.
  ///
  /// Idempotent: a no-op on a session that is already stopping, stopped or
  /// failed. Interrupts a start in progress. In-flight requests fail with
  /// [`EngineError::SessionStopped`].
  #[instrument(name = "session_stop", skip(self), fields(session_id = %self.session_id))]
  pub async fn stop(&self) {
    let server = {
      let mut inner = self.inner();
      match inner.status {
        SessionStatus::Stopping | SessionStatus::Stopped | SessionStatus::Failed => return,
        SessionStatus::Created | SessionStatus::Starting | SessionStatus::Running => {}
      }
      inner.status = SessionStatus::Stopping;
      inner.endpoints = Endpoints::default();
      inner.runtime = None;
      inner.server.take()
    };

    self.cancel.cancel();

    if let Some(mut server) = server {
      if tokio::time::timeout(SERVER_SHUTDOWN_GRACE, &mut server)
        .await
        .is_err()
      {
        warn!(session_id = %self.session_id, "session_server_shutdown_timeout");
        server.abort();
      }
    }

    self.inner().status = SessionStatus::Stopped;
    info!(session_id = %self.session_id, "session_stopped");
  }

  /// Run the graph once.
  ///
  /// The run is abandoned when `request` is cancelled (only this request) or
  /// when the session stops (every request).
  #[instrument(
    name = "session_run",
    skip(self, inputs, notifier, request),
    fields(session_id = %self.session_id, run_id = %run_id)
  )]
  pub async fn run(
    &self,
    run_id: &str,
    inputs: Vec<Value>,
    notifier: Arc<dyn ExecutionNotifier>,
    request: CancellationToken,
  ) -> Result<Value, EngineError> {
    let runtime = {
      let inner = self.inner();
      match (&inner.status, &inner.runtime) {
        (SessionStatus::Running, Some(runtime)) => runtime.clone(),
        _ => return Err(EngineError::NotRunning),
      }
    };

    let scoped = self.cancel.child_token();
    let result = tokio::select! {
      result = runtime.invoke(run_id, inputs, notifier, scoped.clone()) => result,
      _ = request.cancelled() => Err(RuntimeError::Cancelled),
    };
    scoped.cancel();

    result.map_err(|e| self.classify(e))
  }

  fn classify(&self, err: RuntimeError) -> EngineError {
    match err {
      RuntimeError::Cancelled if self.cancel.is_cancelled() => EngineError::SessionStopped,
      RuntimeError::Cancelled => EngineError::Cancelled,
      RuntimeError::NodeFailed { node_id, source } => EngineError::Execution { node_id, source },
      other => EngineError::Runtime(other),
    }
  }
}

impl Drop for EngineSession {
  fn drop(&mut self) {
    // Nothing outlives the session, even without an explicit stop.
    self.cancel.cancel();
  }
}

impl fmt::Debug for EngineSession {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineSession")
      .field("session_id", &self.session_id)
      .field("status", &self.status())
      .finish()
  }
}
