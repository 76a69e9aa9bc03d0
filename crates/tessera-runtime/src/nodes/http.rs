use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tessera_workflow::NodeSpec;
use tracing::debug;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

/// Sends its input as a JSON body to `config.url`.
///
/// `config.method` defaults to `POST`. A JSON response body becomes the output;
/// any other body is returned as a string. Non-2xx responses fail the node.
#[derive(Debug, Clone, Default)]
pub struct HttpNode {
  client: reqwest::Client,
}

impl HttpNode {
  pub fn new() -> Self {
    Self::default()
  }
}

struct Request<'a> {
  url: &'a str,
  method: Method,
}

fn request(node: &NodeSpec) -> Result<Request<'_>, NodeError> {
  let url = node
    .config
    .get("url")
    .and_then(Value::as_str)
    .ok_or_else(|| NodeError::invalid_config("http node requires a string `url`"))?;

  let method = match node.config.get("method").and_then(Value::as_str) {
    Some(m) => m
      .to_ascii_uppercase()
      .parse::<Method>()
      .map_err(|_| NodeError::invalid_config(format!("invalid http method '{}'", m)))?,
    None => Method::POST,
  };

  Ok(Request { url, method })
}

#[async_trait]
impl NodeExecutor for HttpNode {
  async fn prepare(&self, node: &NodeSpec) -> Result<(), NodeError> {
    request(node).map(|_| ())
  }

  async fn execute(
    &self,
    node: &NodeSpec,
    input: Value,
    ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    let req = request(node)?;
    debug!(node_id = %ctx.node_id, url = %req.url, method = %req.method, "http_request");

    let send = self.client.request(req.method, req.url).json(&input).send();
    let response = tokio::select! {
      response = send => response.map_err(|e| NodeError::execution(format!("http request failed: {}", e)))?,
      _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
    };

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| NodeError::execution(format!("failed to read http response: {}", e)))?;

    if !status.is_success() {
      return Err(NodeError::execution(format!(
        "http request returned {}: {}",
        status, body
      )));
    }

    let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    Ok(NodeOutput::new(value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn node(config: Value) -> NodeSpec {
    let mut node = NodeSpec::start("call");
    node.kind = tessera_workflow::NodeKind::Http;
    node.config = config;
    node
  }

  #[tokio::test]
  async fn test_prepare_requires_url() {
    let err = HttpNode::new().prepare(&node(json!({}))).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidConfig { .. }));
  }

  #[tokio::test]
  async fn test_prepare_accepts_lowercase_method() {
    HttpNode::new()
      .prepare(&node(json!({"url": "http://localhost/x", "method": "put"})))
      .await
      .unwrap();
  }
}
