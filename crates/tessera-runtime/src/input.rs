//! Input resolution using minijinja templates.
//!
//! A node with declared input bindings receives an object of rendered values
//! instead of its raw assembled input. Each binding is a template rendered
//! against:
//!
//! ```json
//! { "input": <assembled input>, "upstream": { "<node_id>": <output>, ... } }
//! ```
//!
//! A rendered string that parses as JSON is passed on as JSON (`"5"` → `5`,
//! `"[1, 2]"` → `[1, 2]`); anything else stays a string.

use std::collections::HashMap;

use minijinja::Environment;
use serde_json::{Value, json};

use crate::error::NodeError;

/// Render a node's input bindings.
///
/// # Arguments
/// * `bindings` - The node's input templates, keyed by input name
/// * `input` - The node's assembled input (run inputs or upstream outputs)
/// * `upstream` - Outputs of the node's active upstream nodes, keyed by node id
pub fn resolve_bindings(
  bindings: &HashMap<String, String>,
  input: &Value,
  upstream: &HashMap<String, Value>,
) -> Result<Value, NodeError> {
  let env = Environment::new();
  let context = minijinja::Value::from_serialize(json!({
    "input": input,
    "upstream": upstream,
  }));

  let mut resolved = serde_json::Map::with_capacity(bindings.len());
  for (name, template) in bindings {
    let rendered = env
      .render_str(template, &context)
      .map_err(|e| NodeError::InputResolution {
        message: format!("failed to render input '{}': {}", name, e),
      })?;
    resolved.insert(name.clone(), coerce(rendered));
  }

  Ok(Value::Object(resolved))
}

fn coerce(rendered: String) -> Value {
  serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_render_against_input() {
    let resolved = resolve_bindings(
      &bindings(&[("greeting", "Hello {{ input.name | title }}!")]),
      &json!({"name": "ada"}),
      &HashMap::new(),
    )
    .unwrap();

    assert_eq!(resolved, json!({"greeting": "Hello Ada!"}));
  }

  #[test]
  fn test_render_against_upstream() {
    let upstream = HashMap::from([("fetch".to_string(), json!({"count": 3}))]);
    let resolved = resolve_bindings(
      &bindings(&[("count", "{{ upstream.fetch.count }}")]),
      &Value::Null,
      &upstream,
    )
    .unwrap();

    assert_eq!(resolved, json!({"count": 3}));
  }

  #[test]
  fn test_non_json_stays_string() {
    let resolved = resolve_bindings(
      &bindings(&[("text", "not json {{ input }}")]),
      &json!(1),
      &HashMap::new(),
    )
    .unwrap();

    assert_eq!(resolved, json!({"text": "not json 1"}));
  }

  #[test]
  fn test_syntax_error() {
    let err = resolve_bindings(
      &bindings(&[("broken", "{{ input ")]),
      &json!(1),
      &HashMap::new(),
    )
    .unwrap_err();

    assert!(matches!(err, NodeError::InputResolution { .. }));
  }
}
