use thiserror::Error;

/// A workflow definition that cannot be compiled.
#[derive(Debug, Error)]
pub enum GraphValidationError {
  #[error("workflow has no nodes")]
  EmptyGraph,

  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  #[error("duplicate resource id: {resource_id}")]
  DuplicateResourceId { resource_id: String },

  #[error("edge {from} -> {to} references unknown node '{missing}'")]
  DanglingEdge {
    from: String,
    to: String,
    missing: String,
  },

  #[error("workflow contains a cycle through node '{node_id}'")]
  CycleDetected { node_id: String },

  #[error("workflow declares {count} server resources, expected at most one")]
  MultipleServerResources { count: usize },

  #[error("node not found: {node_id}")]
  NodeNotFound { node_id: String },
}
