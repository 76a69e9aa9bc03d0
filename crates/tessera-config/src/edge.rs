use serde::{Deserialize, Serialize};

/// A directed edge between two nodes.
///
/// `condition` is the branch tag an upstream branch node must select for the
/// edge to carry data. Edges without a condition are always taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
  #[serde(alias = "source")]
  pub from: String,
  #[serde(alias = "target")]
  pub to: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
}

impl EdgeDef {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      condition: None,
    }
  }

  /// An edge that is only taken when the upstream branch selects `tag`.
  pub fn when(from: impl Into<String>, to: impl Into<String>, tag: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      condition: Some(tag.into()),
    }
  }
}
