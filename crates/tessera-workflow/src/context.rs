use std::fmt;

use serde::{Deserialize, Serialize};

/// Which version of an application's workflow is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
  Draft,
  Publish,
}

impl RunMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunMode::Draft => "draft",
      RunMode::Publish => "publish",
    }
  }
}

impl fmt::Display for RunMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifies what is being run. A `node_id` scopes the run to that node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
  pub app_id: String,
  #[serde(default)]
  pub app_name: String,
  pub mode: RunMode,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  /// Export run data for publish-mode runs.
  #[serde(default)]
  pub enable_backflow: bool,
}

impl RunContext {
  pub fn new(app_id: impl Into<String>, mode: RunMode) -> Self {
    let app_id = app_id.into();
    Self {
      app_name: app_id.clone(),
      app_id,
      mode,
      node_id: None,
      enable_backflow: false,
    }
  }

  pub fn draft(app_id: impl Into<String>) -> Self {
    Self::new(app_id, RunMode::Draft)
  }

  pub fn publish(app_id: impl Into<String>) -> Self {
    Self::new(app_id, RunMode::Publish)
  }

  /// The same context scoped to a single node.
  pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
    self.node_id = Some(node_id.into());
    self
  }

  pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
    self.app_name = app_name.into();
    self
  }

  pub fn with_backflow(mut self, enabled: bool) -> Self {
    self.enable_backflow = enabled;
    self
  }

  pub fn is_node_scope(&self) -> bool {
    self.node_id.is_some()
  }

  /// `{app_id}:{mode}`, shared by full and single-node runs.
  pub fn run_key(&self) -> String {
    format!("{}:{}", self.app_id, self.mode)
  }

  /// Key of the engine session serving this context.
  pub fn session_key(&self) -> String {
    match &self.node_id {
      Some(node_id) => format!("{}:node:{}", self.run_key(), node_id),
      None => self.run_key(),
    }
  }
}
