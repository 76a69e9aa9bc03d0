use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tessera_config::{EdgeDef, NodeDef, NodeKind, ResourceDef, SERVER_RESOURCE_KIND};

/// A compiled node: its type tag plus static configuration.
///
/// Nodes never reference the session or executor that runs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
  pub id: String,
  pub kind: NodeKind,
  pub title: String,
  pub config: serde_json::Value,
  pub input_bindings: HashMap<String, String>,
  pub backflow: bool,
  pub timeout_ms: Option<u64>,
  pub resources: Vec<String>,
}

impl NodeSpec {
  /// An entry node that passes the run inputs through.
  pub fn start(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      kind: NodeKind::Start,
      title: "start".to_string(),
      config: serde_json::Value::Null,
      input_bindings: HashMap::new(),
      backflow: false,
      timeout_ms: None,
      resources: Vec::new(),
    }
  }
}

impl From<NodeDef> for NodeSpec {
  fn from(def: NodeDef) -> Self {
    let title = if def.title.is_empty() {
      def.id.clone()
    } else {
      def.title
    };
    Self {
      id: def.id,
      kind: def.kind,
      title,
      config: def.config,
      input_bindings: def.inputs,
      backflow: def.backflow,
      timeout_ms: def.timeout_ms,
      resources: def.resources,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
  pub condition: Option<String>,
}

impl From<EdgeDef> for Edge {
  fn from(def: EdgeDef) -> Self {
    Self {
      from: def.from,
      to: def.to,
      condition: def.condition,
    }
  }
}

/// A resource descriptor: `{id, kind, ...kind-specific fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub id: String,
  pub kind: String,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Resource {
  /// A default execution-server resource.
  pub fn server(id: impl Into<String>) -> Self {
    let id = id.into();
    let mut extra = serde_json::Map::new();
    extra.insert("name".to_string(), serde_json::Value::String(id.clone()));
    extra.insert(
      "args".to_string(),
      serde_json::Value::Object(serde_json::Map::new()),
    );
    Self {
      id,
      kind: SERVER_RESOURCE_KIND.to_string(),
      extra,
    }
  }

  pub fn is_server(&self) -> bool {
    self.kind == SERVER_RESOURCE_KIND
  }
}

impl From<ResourceDef> for Resource {
  fn from(def: ResourceDef) -> Self {
    Self {
      id: def.id,
      kind: def.kind,
      extra: def.extra,
    }
  }
}
