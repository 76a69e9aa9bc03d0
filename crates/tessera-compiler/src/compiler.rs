use std::collections::{HashMap, HashSet};

use tessera_config::WorkflowDef;
use tessera_workflow::{Edge, GraphValidationError, NodeSpec, Resource, WorkflowGraph};
use tracing::{debug, info};

use crate::resources::fresh_id;
use crate::scope::trim_to_node;

/// Compiles workflow definitions into executable graphs.
///
/// Compilation is a pure function of its input: the only nondeterminism is the
/// id of a synthesized server resource.
#[derive(Debug, Clone, Default)]
pub struct GraphCompiler;

impl GraphCompiler {
  pub fn new() -> Self {
    Self
  }

  /// Compile a definition, optionally scoped to a single node.
  pub fn compile(
    &self,
    def: &WorkflowDef,
    scope: Option<&str>,
  ) -> Result<WorkflowGraph, GraphValidationError> {
    if def.nodes.is_empty() {
      return Err(GraphValidationError::EmptyGraph);
    }

    let nodes: Vec<NodeSpec> = def.nodes.iter().cloned().map(NodeSpec::from).collect();
    let edges: Vec<Edge> = def.edges.iter().cloned().map(Edge::from).collect();
    let resources: Vec<Resource> = def.resources.iter().cloned().map(Resource::from).collect();

    let node_ids = unique_node_ids(&nodes)?;
    validate_resources(&resources)?;
    validate_edges(&node_ids, &edges)?;
    detect_cycle(&nodes, &edges)?;

    let (nodes, edges, resources) = match scope {
      Some(node_id) => trim_to_node(nodes, edges, resources, node_id)?,
      None => (nodes, edges, resources),
    };

    let resources = ensure_server(&nodes, resources);

    info!(
      workflow_id = %def.workflow_id,
      scope = scope.unwrap_or("-"),
      nodes = nodes.len(),
      edges = edges.len(),
      resources = resources.len(),
      "workflow_compiled"
    );

    Ok(WorkflowGraph {
      graph_id: def.workflow_id.clone(),
      name: def.name.clone(),
      nodes,
      edges,
      resources,
      scope: scope.map(str::to_string),
    })
  }
}

fn unique_node_ids(nodes: &[NodeSpec]) -> Result<HashSet<&str>, GraphValidationError> {
  let mut ids = HashSet::with_capacity(nodes.len());
  for node in nodes {
    if !ids.insert(node.id.as_str()) {
      return Err(GraphValidationError::DuplicateNodeId {
        node_id: node.id.clone(),
      });
    }
  }
  Ok(ids)
}

fn validate_resources(resources: &[Resource]) -> Result<(), GraphValidationError> {
  let mut ids = HashSet::new();
  for resource in resources {
    if !ids.insert(resource.id.as_str()) {
      return Err(GraphValidationError::DuplicateResourceId {
        resource_id: resource.id.clone(),
      });
    }
  }

  let count = resources.iter().filter(|r| r.is_server()).count();
  if count > 1 {
    return Err(GraphValidationError::MultipleServerResources { count });
  }
  Ok(())
}

/// Validate that all edges reference existing nodes.
fn validate_edges(node_ids: &HashSet<&str>, edges: &[Edge]) -> Result<(), GraphValidationError> {
  for edge in edges {
    for end in [&edge.from, &edge.to] {
      if !node_ids.contains(end.as_str()) {
        return Err(GraphValidationError::DanglingEdge {
          from: edge.from.clone(),
          to: edge.to.clone(),
          missing: end.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Check for cycles using DFS.
fn detect_cycle(nodes: &[NodeSpec], edges: &[Edge]) -> Result<(), GraphValidationError> {
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for node in nodes {
    adjacency.insert(node.id.as_str(), Vec::new());
  }
  for edge in edges {
    if let Some(neighbors) = adjacency.get_mut(edge.from.as_str()) {
      neighbors.push(edge.to.as_str());
    }
  }

  // 0 = unvisited, 1 = in progress, 2 = done
  let mut color: HashMap<&str, u8> = nodes.iter().map(|n| (n.id.as_str(), 0u8)).collect();

  fn dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    color: &mut HashMap<&'a str, u8>,
  ) -> Option<&'a str> {
    color.insert(node, 1);

    if let Some(neighbors) = adjacency.get(node) {
      for &neighbor in neighbors {
        match color.get(neighbor) {
          Some(1) => return Some(neighbor),
          Some(0) => {
            if let Some(found) = dfs(neighbor, adjacency, color) {
              return Some(found);
            }
          }
          _ => {}
        }
      }
    }

    color.insert(node, 2);
    None
  }

  for node in nodes {
    if color.get(node.id.as_str()) == Some(&0) {
      if let Some(found) = dfs(node.id.as_str(), &adjacency, &mut color) {
        return Err(GraphValidationError::CycleDetected {
          node_id: found.to_string(),
        });
      }
    }
  }

  Ok(())
}

/// Add a server resource when a node needs one and none is declared.
fn ensure_server(nodes: &[NodeSpec], mut resources: Vec<Resource>) -> Vec<Resource> {
  let needed = nodes.iter().any(|n| n.kind.requires_server());
  if !needed || resources.iter().any(|r| r.is_server()) {
    return resources;
  }

  let taken: HashSet<&str> = nodes
    .iter()
    .map(|n| n.id.as_str())
    .chain(resources.iter().map(|r| r.id.as_str()))
    .collect();
  let id = fresh_id("server", &taken);
  debug!(resource_id = %id, "server_resource_synthesized");
  resources.push(Resource::server(id));
  resources
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeSet;
  use tessera_config::{EdgeDef, NodeDef, NodeKind, ResourceDef};

  fn linear_def() -> WorkflowDef {
    WorkflowDef {
      workflow_id: "wf".to_string(),
      name: "linear".to_string(),
      nodes: vec![
        NodeDef::new("start", NodeKind::Start),
        NodeDef::new("llm", NodeKind::Llm),
        NodeDef::new("end", NodeKind::End),
      ],
      edges: vec![EdgeDef::new("start", "llm"), EdgeDef::new("llm", "end")],
      resources: vec![],
    }
  }

  fn structure(graph: &WorkflowGraph) -> (BTreeSet<String>, BTreeSet<(String, String)>) {
    let nodes = graph.nodes.iter().map(|n| n.id.clone()).collect();
    let edges = graph
      .edges
      .iter()
      .map(|e| (e.from.clone(), e.to.clone()))
      .collect();
    (nodes, edges)
  }

  #[test]
  fn test_compile_is_structurally_idempotent() {
    let compiler = GraphCompiler::new();
    let def = linear_def();

    let first = compiler.compile(&def, None).unwrap();
    let second = compiler.compile(&def, None).unwrap();

    assert_eq!(structure(&first), structure(&second));
    assert_eq!(first.server_resources().count(), 1);
    assert_eq!(second.server_resources().count(), 1);
  }

  #[test]
  fn test_existing_server_not_duplicated() {
    let mut def = linear_def();
    def.resources.push(ResourceDef::new("srv", "server"));

    let graph = GraphCompiler::new().compile(&def, None).unwrap();
    let servers: Vec<_> = graph.server_resources().collect();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "srv");
  }

  #[test]
  fn test_no_server_without_network_nodes() {
    let mut def = linear_def();
    def.nodes[1].kind = NodeKind::Template;

    let graph = GraphCompiler::new().compile(&def, None).unwrap();
    assert_eq!(graph.server_resources().count(), 0);
  }

  #[test]
  fn test_dangling_edge() {
    let mut def = linear_def();
    def.edges.push(EdgeDef::new("llm", "missing"));

    let err = GraphCompiler::new().compile(&def, None).unwrap_err();
    assert!(matches!(
      err,
      GraphValidationError::DanglingEdge { ref missing, .. } if missing == "missing"
    ));
  }

  #[test]
  fn test_duplicate_node_id() {
    let mut def = linear_def();
    def.nodes.push(NodeDef::new("llm", NodeKind::Tool));

    let err = GraphCompiler::new().compile(&def, None).unwrap_err();
    assert!(matches!(err, GraphValidationError::DuplicateNodeId { .. }));
  }

  #[test]
  fn test_cycle_detected() {
    let mut def = linear_def();
    def.edges.push(EdgeDef::new("end", "start"));

    let err = GraphCompiler::new().compile(&def, None).unwrap_err();
    assert!(matches!(err, GraphValidationError::CycleDetected { .. }));
  }

  #[test]
  fn test_multiple_servers_rejected() {
    let mut def = linear_def();
    def.resources.push(ResourceDef::new("a", "server"));
    def.resources.push(ResourceDef::new("b", "server"));

    let err = GraphCompiler::new().compile(&def, None).unwrap_err();
    assert!(matches!(
      err,
      GraphValidationError::MultipleServerResources { count: 2 }
    ));
  }

  #[test]
  fn test_empty_definition() {
    let mut def = linear_def();
    def.nodes.clear();
    def.edges.clear();

    let err = GraphCompiler::new().compile(&def, None).unwrap_err();
    assert!(matches!(err, GraphValidationError::EmptyGraph));
  }

  #[test]
  fn test_node_order_preserved() {
    let graph = GraphCompiler::new().compile(&linear_def(), None).unwrap();
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["start", "llm", "end"]);
    assert_eq!(graph.scope, None);
  }
}
