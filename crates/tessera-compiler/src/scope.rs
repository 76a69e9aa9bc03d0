//! Single-node scoping.
//!
//! A scoped graph keeps the target node and those of its direct upstream nodes
//! whose output does not depend on their input (constants). Every other direct
//! upstream is replaced by one synthesized start node that feeds the run inputs
//! into the target. Nothing downstream of the target survives.
//!
//! Upstreams further than one hop away are never visited: a scoped run of a
//! node fed by `a -> b -> target` sees the caller's inputs where `b`'s output
//! would have been.

use std::collections::HashSet;

use tessera_workflow::{Edge, GraphValidationError, NodeSpec, Resource};
use tracing::debug;

use crate::resources::fresh_id;

const START_NODE_ID: &str = "__start__";

pub(crate) fn trim_to_node(
  nodes: Vec<NodeSpec>,
  edges: Vec<Edge>,
  resources: Vec<Resource>,
  node_id: &str,
) -> Result<(Vec<NodeSpec>, Vec<Edge>, Vec<Resource>), GraphValidationError> {
  if !nodes.iter().any(|n| n.id == node_id) {
    return Err(GraphValidationError::NodeNotFound {
      node_id: node_id.to_string(),
    });
  }

  let is_static = |id: &str| nodes.iter().any(|n| n.id == id && n.kind.is_static());

  let incoming: Vec<&Edge> = edges.iter().filter(|e| e.to == node_id).collect();
  let kept_upstream: HashSet<&str> = incoming
    .iter()
    .filter(|e| is_static(&e.from))
    .map(|e| e.from.as_str())
    .collect();
  let needs_start = incoming.iter().any(|e| !is_static(&e.from));

  let mut kept_edges: Vec<Edge> = incoming
    .iter()
    .filter(|e| kept_upstream.contains(e.from.as_str()))
    .map(|e| (*e).clone())
    .collect();

  let mut kept_nodes: Vec<NodeSpec> = nodes
    .iter()
    .filter(|n| n.id == node_id || kept_upstream.contains(n.id.as_str()))
    .cloned()
    .collect();

  if needs_start {
    let taken: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let start_id = if taken.contains(START_NODE_ID) {
      fresh_id(START_NODE_ID, &taken)
    } else {
      START_NODE_ID.to_string()
    };

    kept_edges.insert(
      0,
      Edge {
        from: start_id.clone(),
        to: node_id.to_string(),
        condition: None,
      },
    );
    kept_nodes.insert(0, NodeSpec::start(start_id));
  }

  let used: HashSet<&str> = kept_nodes
    .iter()
    .flat_map(|n| n.resources.iter().map(|r| r.as_str()))
    .collect();
  let kept_resources: Vec<Resource> = resources
    .iter()
    .filter(|r| r.is_server() || used.contains(r.id.as_str()))
    .cloned()
    .collect();

  debug!(
    node_id = %node_id,
    kept_upstream = kept_upstream.len(),
    synthesized_start = needs_start,
    "graph_trimmed_to_node"
  );

  Ok((kept_nodes, kept_edges, kept_resources))
}

#[cfg(test)]
mod tests {
  use crate::GraphCompiler;
  use serde_json::json;
  use tessera_config::{EdgeDef, NodeDef, NodeKind, ResourceDef, WorkflowDef};
  use tessera_workflow::GraphValidationError;

  fn def() -> WorkflowDef {
    let mut llm = NodeDef::new("llm", NodeKind::Llm);
    llm.resources = vec!["model".to_string()];

    WorkflowDef {
      workflow_id: "wf".to_string(),
      name: "scoped".to_string(),
      nodes: vec![
        NodeDef::new("start", NodeKind::Start),
        NodeDef::new("prep", NodeKind::Template).with_config(json!({"template": "{{ input }}!"})),
        NodeDef::new("prompt", NodeKind::Constant).with_config(json!({"value": "be brief"})),
        llm,
        NodeDef::new("end", NodeKind::End),
      ],
      edges: vec![
        EdgeDef::new("start", "prep"),
        EdgeDef::new("prep", "llm"),
        EdgeDef::new("prompt", "llm"),
        EdgeDef::new("llm", "end"),
      ],
      resources: vec![
        ResourceDef::new("model", "model"),
        ResourceDef::new("web", "web"),
      ],
    }
  }

  #[test]
  fn test_scope_keeps_static_upstream_and_replaces_the_rest() {
    let graph = GraphCompiler::new().compile(&def(), Some("llm")).unwrap();

    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["__start__", "prompt", "llm"]);

    let edges: Vec<(&str, &str)> = graph
      .edges
      .iter()
      .map(|e| (e.from.as_str(), e.to.as_str()))
      .collect();
    assert_eq!(edges, vec![("__start__", "llm"), ("prompt", "llm")]);

    let resource_ids: Vec<&str> = graph.resources.iter().map(|r| r.id.as_str()).collect();
    assert!(resource_ids.contains(&"model"));
    assert!(!resource_ids.contains(&"web"));
    assert_eq!(graph.server_resources().count(), 1);
    assert_eq!(graph.scope.as_deref(), Some("llm"));
  }

  #[test]
  fn test_scope_does_not_follow_multi_hop_upstreams() {
    // start -> prep -> llm: only the direct upstream is considered, and prep is
    // not static, so neither prep nor start survive.
    let graph = GraphCompiler::new().compile(&def(), Some("llm")).unwrap();
    assert!(graph.get_node("prep").is_none());
    assert!(graph.get_node("start").is_none());
  }

  #[test]
  fn test_scope_on_entry_node_needs_no_start() {
    let graph = GraphCompiler::new().compile(&def(), Some("start")).unwrap();
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["start"]);
    assert!(graph.edges.is_empty());
  }

  #[test]
  fn test_scope_to_unknown_node() {
    let err = GraphCompiler::new()
      .compile(&def(), Some("missing"))
      .unwrap_err();
    assert!(matches!(err, GraphValidationError::NodeNotFound { .. }));
  }

  #[test]
  fn test_synthesized_start_avoids_collisions() {
    let mut def = def();
    def.nodes[0].id = "__start__".to_string();
    def.edges[0].from = "__start__".to_string();

    let graph = GraphCompiler::new().compile(&def, Some("prep")).unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_ne!(graph.nodes[0].id, "__start__");
    assert!(graph.nodes[0].id.starts_with("__start__-"));
  }
}
