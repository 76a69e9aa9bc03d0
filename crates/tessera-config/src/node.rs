use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::input::InputValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  #[serde(alias = "node_id")]
  pub id: String,
  #[serde(alias = "type")]
  pub kind: NodeKind,
  #[serde(default)]
  pub title: String,
  /// Kind-specific configuration, interpreted only by the node implementation.
  #[serde(default)]
  pub config: serde_json::Value,
  #[serde(default)]
  pub inputs: HashMap<String, InputValue>,
  /// Whether this node's run data is exported for downstream consumers.
  #[serde(default)]
  pub backflow: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Ids of the workflow resources this node uses.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub resources: Vec<String>,
}

impl NodeDef {
  pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
    let id = id.into();
    Self {
      title: id.clone(),
      id,
      kind,
      config: serde_json::Value::Null,
      inputs: HashMap::new(),
      backflow: false,
      timeout_ms: None,
      resources: Vec::new(),
    }
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn with_title(mut self, title: impl Into<String>) -> Self {
    self.title = title.into();
    self
  }
}

/// The type tag of a node.
///
/// The compiler only looks at the tag; implementations are looked up by
/// [`NodeKind::as_str`] in the runtime's node registry, so kinds outside the
/// known set are carried as [`NodeKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
  Start,
  End,
  Join,
  Branch,
  Template,
  Constant,
  Code,
  Llm,
  Tool,
  Http,
  Custom(String),
}

impl NodeKind {
  pub fn as_str(&self) -> &str {
    match self {
      NodeKind::Start => "start",
      NodeKind::End => "end",
      NodeKind::Join => "join",
      NodeKind::Branch => "branch",
      NodeKind::Template => "template",
      NodeKind::Constant => "constant",
      NodeKind::Code => "code",
      NodeKind::Llm => "llm",
      NodeKind::Tool => "tool",
      NodeKind::Http => "http",
      NodeKind::Custom(kind) => kind,
    }
  }

  /// Kinds that call out over the network and need an execution server.
  pub fn requires_server(&self) -> bool {
    matches!(self, NodeKind::Llm | NodeKind::Tool | NodeKind::Http)
  }

  /// Kinds whose output does not depend on their input.
  pub fn is_static(&self) -> bool {
    matches!(self, NodeKind::Constant)
  }
}

impl From<String> for NodeKind {
  fn from(kind: String) -> Self {
    match kind.as_str() {
      "start" => NodeKind::Start,
      "end" => NodeKind::End,
      "join" => NodeKind::Join,
      "branch" => NodeKind::Branch,
      "template" => NodeKind::Template,
      "constant" => NodeKind::Constant,
      "code" => NodeKind::Code,
      "llm" => NodeKind::Llm,
      "tool" => NodeKind::Tool,
      "http" => NodeKind::Http,
      _ => NodeKind::Custom(kind),
    }
  }
}

impl From<&str> for NodeKind {
  fn from(kind: &str) -> Self {
    NodeKind::from(kind.to_string())
  }
}

impl From<NodeKind> for String {
  fn from(kind: NodeKind) -> Self {
    kind.as_str().to_string()
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
