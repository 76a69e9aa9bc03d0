use async_trait::async_trait;
use serde_json::Value;
use tessera_workflow::NodeSpec;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

/// Start and end nodes: the input is the output.
#[derive(Debug, Clone, Default)]
pub struct PassthroughNode;

#[async_trait]
impl NodeExecutor for PassthroughNode {
  async fn execute(
    &self,
    _node: &NodeSpec,
    input: Value,
    _ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    Ok(NodeOutput::new(input))
  }
}
