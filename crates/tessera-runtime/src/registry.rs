//! Node type registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::NodeExecutor;
use crate::nodes::{
  BranchNode, ConstantNode, HttpNode, JoinNode, PassthroughNode, TemplateNode,
};

/// Maps node type tags to their implementations.
#[derive(Clone, Default)]
pub struct NodeRegistry {
  executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding every built-in node type.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("start", PassthroughNode);
    registry.register("end", PassthroughNode);
    registry.register("join", JoinNode);
    registry.register("branch", BranchNode);
    registry.register("template", TemplateNode);
    registry.register("constant", ConstantNode);
    registry.register("http", HttpNode::new());
    registry
  }

  /// Register (or replace) the implementation for `kind`.
  pub fn register(&mut self, kind: impl Into<String>, executor: impl NodeExecutor + 'static) {
    self.executors.insert(kind.into(), Arc::new(executor));
  }

  pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
    self.executors.get(kind).cloned()
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.executors.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.executors.keys().map(|k| k.as_str()).collect();
    kinds.sort_unstable();
    kinds
  }
}

impl std::fmt::Debug for NodeRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NodeRegistry")
      .field("kinds", &self.kinds())
      .finish()
  }
}
