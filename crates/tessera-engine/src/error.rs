//! Engine error types.

use tessera_runtime::{NodeError, RuntimeError};
use tessera_workflow::GraphValidationError;

use crate::session::SessionStatus;

/// A session failed to reach `Running`. The session is left `Failed` (or
/// `Stopped` when a stop interrupted the start) and cannot be started again.
#[derive(Debug, thiserror::Error)]
pub enum EngineStartError {
  #[error("no executor registered for kind '{kind}' (node '{node_id}')")]
  UnknownNodeKind { node_id: String, kind: String },

  #[error("failed to prepare node '{node_id}': {source}")]
  Prepare {
    node_id: String,
    #[source]
    source: NodeError,
  },

  #[error("failed to bind session endpoint: {source}")]
  Bind {
    #[source]
    source: std::io::Error,
  },

  /// The session did not reach `Running` within the start timeout.
  #[error("session did not start within {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("session cannot be started from state '{status}'")]
  InvalidState { status: SessionStatus },

  #[error("session was stopped while starting")]
  Aborted,

  #[error("invalid graph: {message}")]
  InvalidGraph { message: String },
}

impl From<RuntimeError> for EngineStartError {
  fn from(err: RuntimeError) -> Self {
    match err {
      RuntimeError::UnknownNodeKind { node_id, kind } => {
        EngineStartError::UnknownNodeKind { node_id, kind }
      }
      RuntimeError::Prepare { node_id, source } => EngineStartError::Prepare { node_id, source },
      other => EngineStartError::InvalidGraph {
        message: other.to_string(),
      },
    }
  }
}

/// Errors surfaced by the executor.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  Graph(#[from] GraphValidationError),

  #[error(transparent)]
  Start(#[from] EngineStartError),

  /// Execution was attempted against a session that is not `Running`.
  #[error("engine is not running")]
  NotRunning,

  /// The session was stopped while the request was in flight.
  #[error("engine session was stopped")]
  SessionStopped,

  /// A node failed and nothing in the graph absorbed the failure.
  #[error("node '{node_id}' failed: {source}")]
  Execution {
    node_id: String,
    #[source]
    source: NodeError,
  },

  #[error("request cancelled")]
  Cancelled,

  #[error("execution timed out after {timeout_ms}ms")]
  ExecutionTimeout { timeout_ms: u64 },

  #[error("runtime error: {0}")]
  Runtime(#[source] RuntimeError),
}

impl EngineError {
  /// Id of the node that caused the failure, when one did.
  pub fn node_id(&self) -> Option<&str> {
    match self {
      EngineError::Execution { node_id, .. } => Some(node_id),
      _ => None,
    }
  }
}
