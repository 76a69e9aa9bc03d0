use serde::{Deserialize, Serialize};

/// Resource kind interpreted directly by the engine.
pub const SERVER_RESOURCE_KIND: &str = "server";

/// An ancillary resource attached to a workflow (execution server, web UI,
/// model endpoint, ...).
///
/// Only `kind` is interpreted by the engine; every other field is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
  pub id: String,
  pub kind: String,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceDef {
  pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      kind: kind.into(),
      extra: serde_json::Map::new(),
    }
  }

  pub fn is_server(&self) -> bool {
    self.kind == SERVER_RESOURCE_KIND
  }
}
