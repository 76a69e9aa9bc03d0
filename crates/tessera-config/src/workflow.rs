use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::node::NodeDef;
use crate::resource::ResourceDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
  #[serde(default)]
  pub resources: Vec<ResourceDef>,
}

impl WorkflowDef {
  pub fn get_node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.id == node_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::NodeKind;
  use serde_json::json;

  #[test]
  fn test_parse_definition() {
    let def: WorkflowDef = serde_json::from_value(json!({
      "workflow_id": "wf-1",
      "name": "Greeting",
      "nodes": [
        { "id": "start", "kind": "start" },
        { "node_id": "llm", "type": "llm", "title": "Answer", "backflow": true },
        { "id": "ocr", "kind": "ocr", "config": { "lang": "en" } }
      ],
      "edges": [
        { "source": "start", "target": "llm" },
        { "from": "llm", "to": "ocr", "condition": "yes" }
      ],
      "resources": [
        { "id": "srv", "kind": "server", "port": 8080 }
      ]
    }))
    .unwrap();

    assert_eq!(def.nodes.len(), 3);
    assert_eq!(def.nodes[1].id, "llm");
    assert_eq!(def.nodes[1].kind, NodeKind::Llm);
    assert!(def.nodes[1].backflow);
    assert_eq!(def.nodes[2].kind, NodeKind::Custom("ocr".to_string()));
    assert_eq!(def.edges[0].from, "start");
    assert_eq!(def.edges[1].condition.as_deref(), Some("yes"));
    assert!(def.resources[0].is_server());
    assert_eq!(def.resources[0].extra["port"], 8080);
  }

  #[test]
  fn test_node_kind_serializes_as_tag() {
    let value = serde_json::to_value(NodeKind::Custom("ocr".to_string())).unwrap();
    assert_eq!(value, json!("ocr"));
    assert_eq!(serde_json::to_value(NodeKind::Branch).unwrap(), json!("branch"));
    assert!(NodeKind::Http.requires_server());
    assert!(!NodeKind::Template.requires_server());
  }
}
