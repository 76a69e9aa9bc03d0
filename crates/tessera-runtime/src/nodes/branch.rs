//! Conditional routing.
//!
//! ```json
//! {
//!   "field": "/score",
//!   "cases": [
//!     { "tag": "high", "op": "ge", "value": 0.8 },
//!     { "tag": "empty", "op": "empty" }
//!   ],
//!   "default": "low"
//! }
//! ```
//!
//! The first matching case selects its tag; otherwise `default` does. With no
//! match and no default the branch takes none of its conditional edges. The
//! node's output is its input, unchanged.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tessera_workflow::NodeSpec;

use crate::error::NodeError;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};

#[derive(Debug, Clone, Default)]
pub struct BranchNode;

#[derive(Debug, Deserialize)]
struct BranchConfig {
  /// JSON pointer into the input; the whole input when absent.
  #[serde(default)]
  field: Option<String>,
  cases: Vec<Case>,
  #[serde(default)]
  default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Case {
  tag: String,
  op: Op,
  #[serde(default)]
  value: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Op {
  Eq,
  Ne,
  Gt,
  Ge,
  Lt,
  Le,
  Contains,
  Empty,
  NotEmpty,
}

impl BranchConfig {
  fn parse(node: &NodeSpec) -> Result<Self, NodeError> {
    serde_json::from_value(node.config.clone())
      .map_err(|e| NodeError::invalid_config(format!("branch config: {}", e)))
  }

  fn select(&self, input: &Value) -> Option<String> {
    let subject = match &self.field {
      Some(pointer) => input.pointer(pointer).unwrap_or(&Value::Null),
      None => input,
    };

    self
      .cases
      .iter()
      .find(|case| case.matches(subject))
      .map(|case| case.tag.clone())
      .or_else(|| self.default.clone())
  }
}

impl Case {
  fn matches(&self, subject: &Value) -> bool {
    match self.op {
      Op::Eq => loosely_equal(subject, &self.value),
      Op::Ne => !loosely_equal(subject, &self.value),
      Op::Gt => compare(subject, &self.value) == Some(Ordering::Greater),
      Op::Ge => matches!(
        compare(subject, &self.value),
        Some(Ordering::Greater | Ordering::Equal)
      ),
      Op::Lt => compare(subject, &self.value) == Some(Ordering::Less),
      Op::Le => matches!(
        compare(subject, &self.value),
        Some(Ordering::Less | Ordering::Equal)
      ),
      Op::Contains => contains(subject, &self.value),
      Op::Empty => is_empty(subject),
      Op::NotEmpty => !is_empty(subject),
    }
  }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
  }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
  match (haystack, needle) {
    (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
    (Value::Array(items), n) => items.iter().any(|item| loosely_equal(item, n)),
    (Value::Object(map), Value::String(key)) => map.contains_key(key),
    _ => false,
  }
}

fn is_empty(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    Value::Array(a) => a.is_empty(),
    Value::Object(o) => o.is_empty(),
    _ => false,
  }
}

#[async_trait]
impl NodeExecutor for BranchNode {
  async fn prepare(&self, node: &NodeSpec) -> Result<(), NodeError> {
    BranchConfig::parse(node).map(|_| ())
  }

  async fn execute(
    &self,
    node: &NodeSpec,
    input: Value,
    _ctx: &NodeContext,
  ) -> Result<NodeOutput, NodeError> {
    let config = BranchConfig::parse(node)?;
    let tag = config.select(&input);
    Ok(NodeOutput::new(input).with_branch(tag))
  }
}
