use async_trait::async_trait;
use serde_json::Value;
use tessera_workflow::NodeSpec;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

/// Emits `config.value` regardless of its input.
#[derive(Debug, Clone, Default)]
pub struct ConstantNode;

fn constant(node: &NodeSpec) -> Result<&Value, NodeError> {
  node
    .config
    .get("value")
    .ok_or_else(|| NodeError::invalid_config("constant node requires `value`"))
}

#[async_trait]
impl NodeExecutor for ConstantNode {
  async fn prepare(&self, node: &NodeSpec) -> Result<(), NodeError> {
    constant(node).map(|_| ())
  }

  async fn execute(
    &self,
    node: &NodeSpec,
    _input: Value,
    _ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    Ok(NodeOutput::new(constant(node)?.clone()))
  }
}
