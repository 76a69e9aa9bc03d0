//! The contract every node type fulfils.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tessera_workflow::NodeSpec;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::event::{ExecutionNotifier, RunEvent};

/// Output of one node execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
  pub value: Value,
  /// Branch tag selected by a routing node. Outgoing edges whose condition
  /// differs from it are not taken.
  pub branch: Option<String>,
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
}

impl NodeOutput {
  pub fn new(value: Value) -> Self {
    Self {
      value,
      ..Default::default()
    }
  }

  pub fn with_branch(mut self, tag: Option<String>) -> Self {
    self.branch = tag;
    self
  }

  pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
    self.prompt_tokens = prompt_tokens;
    self.completion_tokens = completion_tokens;
    self
  }
}

/// Per-execution context handed to a node.
#[derive(Clone)]
pub struct NodeContext {
  pub run_id: String,
  pub node_id: String,
  /// Cancelled when the request is abandoned or the session stops.
  pub cancel: CancellationToken,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl NodeContext {
  pub fn new(
    run_id: impl Into<String>,
    node_id: impl Into<String>,
    cancel: CancellationToken,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      run_id: run_id.into(),
      node_id: node_id.into(),
      cancel,
      notifier,
    }
  }

  /// Stream a partial output chunk to the caller.
  pub fn emit_chunk(&self, chunk: impl Into<String>) {
    self.notifier.notify(RunEvent::Chunk {
      node_id: self.node_id.clone(),
      chunk: chunk.into(),
    });
  }
}

/// A node type implementation.
///
/// One executor instance serves every node of its kind, so implementations
/// take all per-node configuration from the [`NodeSpec`].
#[async_trait]
pub trait NodeExecutor: Send + Sync {
  /// One-time setup when a session starts (validate config, warm clients).
  async fn prepare(&self, _node: &NodeSpec) -> Result<(), NodeError> {
    Ok(())
  }

  /// Run the node on its assembled input.
  async fn execute(
    &self,
    node: &NodeSpec,
    input: Value,
    ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError>;
}
