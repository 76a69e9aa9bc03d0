use async_trait::async_trait;
use serde_json::Value;
use tessera_workflow::NodeSpec;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

/// Merge point for parallel branches.
///
/// The scheduler already hands a node with several active upstreams an array
/// of their outputs in edge order, so the join only forwards it. With
/// `config.flatten` nested arrays are concatenated one level.
#[derive(Debug, Clone, Default)]
pub struct JoinNode;

#[async_trait]
impl NodeExecutor for JoinNode {
  async fn execute(
    &self,
    node: &NodeSpec,
    input: Value,
    _ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    let flatten = node
      .config
      .get("flatten")
      .and_then(Value::as_bool)
      .unwrap_or(false);

    let value = match input {
      Value::Array(items) if flatten => Value::Array(
        items
          .into_iter()
          .flat_map(|item| match item {
            Value::Array(inner) => inner,
            other => vec![other],
          })
          .collect(),
      ),
      other => other,
    };

    Ok(NodeOutput::new(value))
  }
}
