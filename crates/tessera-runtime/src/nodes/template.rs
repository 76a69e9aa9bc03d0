use async_trait::async_trait;
use minijinja::Environment;
use serde_json::{Value, json};
use tessera_workflow::NodeSpec;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

/// Renders `config.template` with minijinja; the input is bound as `input`.
///
/// The output is always a string.
#[derive(Debug, Clone, Default)]
pub struct TemplateNode;

fn template(node: &NodeSpec) -> Result<&str, NodeError> {
  node
    .config
    .get("template")
    .and_then(Value::as_str)
    .ok_or_else(|| NodeError::invalid_config("template node requires a string `template`"))
}

#[async_trait]
impl NodeExecutor for TemplateNode {
  async fn prepare(&self, node: &NodeSpec) -> Result<(), NodeError> {
    let source = template(node)?;
    let env = Environment::new();
    env
      .template_from_str(source)
      .map_err(|e| NodeError::invalid_config(format!("template does not parse: {}", e)))?;
    Ok(())
  }

  async fn execute(
    &self,
    node: &NodeSpec,
    input: Value,
    _ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    let source = template(node)?;
    let env = Environment::new();
    let rendered = env
      .render_str(source, json!({ "input": input }))
      .map_err(|e| NodeError::execution(format!("template render failed: {}", e)))?;
    Ok(NodeOutput::new(Value::String(rendered)))
  }
}
