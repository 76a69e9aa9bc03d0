//! Runtime error types.

/// Failure of a single node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// The node's static configuration is unusable.
  #[error("invalid node config: {message}")]
  InvalidConfig { message: String },

  /// Failed to resolve node inputs (template rendering).
  #[error("input resolution failed: {message}")]
  InputResolution { message: String },

  /// The node ran and failed.
  #[error("{message}")]
  Execution { message: String },

  #[error("timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("cancelled")]
  Cancelled,
}

impl NodeError {
  pub fn invalid_config(message: impl Into<String>) -> Self {
    NodeError::InvalidConfig {
      message: message.into(),
    }
  }

  pub fn execution(message: impl Into<String>) -> Self {
    NodeError::Execution {
      message: message.into(),
    }
  }
}

/// Errors that can occur while preparing or running a graph.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// A node failed and nothing in the graph absorbed the failure.
  #[error("node '{node_id}' failed: {source}")]
  NodeFailed {
    node_id: String,
    #[source]
    source: NodeError,
  },

  /// No implementation is registered for a node's type tag.
  #[error("no executor registered for kind '{kind}' (node '{node_id}')")]
  UnknownNodeKind { node_id: String, kind: String },

  /// A node's one-time preparation failed.
  #[error("failed to prepare node '{node_id}': {source}")]
  Prepare {
    node_id: String,
    #[source]
    source: NodeError,
  },

  /// Invalid workflow graph structure.
  #[error("invalid graph: {message}")]
  InvalidGraph { message: String },
}
