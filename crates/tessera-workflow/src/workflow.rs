use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::node::{Edge, NodeSpec, Resource};

/// A compiled workflow ready to be instantiated by an engine session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
  pub graph_id: String,
  pub name: String,
  /// Nodes in definition order.
  pub nodes: Vec<NodeSpec>,
  pub edges: Vec<Edge>,
  pub resources: Vec<Resource>,
  /// Set when the graph was trimmed for a single-node run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scope: Option<String>,
}

impl WorkflowGraph {
  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes, &self.edges)
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&NodeSpec> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  pub fn server_resources(&self) -> impl Iterator<Item = &Resource> {
    self.resources.iter().filter(|r| r.is_server())
  }

  /// The same graph with its resource list replaced.
  pub fn with_resources(self, resources: Vec<Resource>) -> Self {
    Self { resources, ..self }
  }
}
