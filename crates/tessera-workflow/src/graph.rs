use std::collections::{HashMap, HashSet, VecDeque};

use crate::node::{Edge, NodeSpec};

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node ids in definition order.
  order: Vec<String>,
  /// Adjacency list: node_id -> outgoing edges.
  outgoing: HashMap<String, Vec<Edge>>,
  /// Reverse adjacency: node_id -> incoming edges, in edge order.
  incoming: HashMap<String, Vec<Edge>>,
  /// Nodes with no incoming edges.
  entry_points: Vec<String>,
  /// Nodes with no outgoing edges.
  sinks: Vec<String>,
  /// Nodes with multiple incoming edges (join points).
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from nodes and edges.
  pub fn new(nodes: &[NodeSpec], edges: &[Edge]) -> Self {
    let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
    let mut incoming: HashMap<String, Vec<Edge>> = HashMap::new();

    for node in nodes {
      outgoing.entry(node.id.clone()).or_default();
      incoming.entry(node.id.clone()).or_default();
    }

    for edge in edges {
      outgoing
        .entry(edge.from.clone())
        .or_default()
        .push(edge.clone());
      incoming.entry(edge.to.clone()).or_default().push(edge.clone());
    }

    let order: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

    let entry_points = order
      .iter()
      .filter(|id| incoming.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let sinks = order
      .iter()
      .filter(|id| outgoing.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let join_points = incoming
      .iter()
      .filter(|(_, edges)| edges.len() > 1)
      .map(|(id, _)| id.clone())
      .collect();

    Self {
      order,
      outgoing,
      incoming,
      entry_points,
      sinks,
      join_points,
    }
  }

  /// Get entry points (nodes with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get sinks (nodes with no outgoing edges), in definition order.
  pub fn sinks(&self) -> &[String] {
    &self.sinks
  }

  /// Get the edges leaving a node.
  pub fn outgoing(&self, node_id: &str) -> &[Edge] {
    self
      .outgoing
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get the edges entering a node, in edge order.
  pub fn incoming(&self, node_id: &str) -> &[Edge] {
    self
      .incoming
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> Vec<&str> {
    self.outgoing(node_id).iter().map(|e| e.to.as_str()).collect()
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> Vec<&str> {
    self
      .incoming(node_id)
      .iter()
      .map(|e| e.from.as_str())
      .collect()
  }

  /// Check if a node is a join point (has multiple incoming edges).
  pub fn is_join_point(&self, node_id: &str) -> bool {
    self.join_points.contains(node_id)
  }

  /// Node ids in dependency order, ties broken by definition order.
  ///
  /// Nodes on a cycle are left out; compiled graphs never contain one.
  pub fn topological_order(&self) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = self
      .order
      .iter()
      .map(|id| (id.as_str(), self.incoming(id).len()))
      .collect();
    let position: HashMap<&str, usize> = self
      .order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();

    let mut ready: VecDeque<&str> = self.entry_points.iter().map(|s| s.as_str()).collect();
    let mut sorted = Vec::with_capacity(self.order.len());

    while let Some(id) = ready.pop_front() {
      sorted.push(id.to_string());

      let mut unlocked = Vec::new();
      for edge in self.outgoing(id) {
        if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            unlocked.push(edge.to.as_str());
          }
        }
      }
      unlocked.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
      ready.extend(unlocked);
    }

    sorted
  }
}
