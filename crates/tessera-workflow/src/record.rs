use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
  Running,
  Succeeded,
  Failed,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, NodeStatus::Running)
  }

  /// Status only moves forward: a finished node never goes back to running.
  pub fn can_transition_to(&self, next: NodeStatus) -> bool {
    !(self.is_terminal() && next == NodeStatus::Running)
  }
}

/// Progress of one node, as streamed to callers and stored in run state.
///
/// The field set is consumed downstream (billing, observability) and must
/// keep this exact shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunRecord {
  pub node_id: String,
  pub node_type: String,
  pub title: String,
  pub inputs: serde_json::Value,
  pub outputs: serde_json::Value,
  pub status: NodeStatus,
  /// Seconds.
  pub elapsed_time: f64,
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
}

impl NodeRunRecord {
  pub fn total_tokens(&self) -> u64 {
    self.prompt_tokens + self.completion_tokens
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_status_never_regresses() {
    assert!(NodeStatus::Running.can_transition_to(NodeStatus::Succeeded));
    assert!(NodeStatus::Running.can_transition_to(NodeStatus::Failed));
    assert!(NodeStatus::Succeeded.can_transition_to(NodeStatus::Failed));
    assert!(!NodeStatus::Succeeded.can_transition_to(NodeStatus::Running));
    assert!(!NodeStatus::Failed.can_transition_to(NodeStatus::Running));
  }

  #[test]
  fn test_record_shape() {
    let record = NodeRunRecord {
      node_id: "a".to_string(),
      node_type: "template".to_string(),
      title: "A".to_string(),
      inputs: json!(1),
      outputs: json!("[1 + code1]"),
      status: NodeStatus::Succeeded,
      elapsed_time: 0.5,
      prompt_tokens: 3,
      completion_tokens: 4,
    };

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(
      value,
      json!({
        "node_id": "a",
        "node_type": "template",
        "title": "A",
        "inputs": 1,
        "outputs": "[1 + code1]",
        "status": "succeeded",
        "elapsed_time": 0.5,
        "prompt_tokens": 3,
        "completion_tokens": 4,
      })
    );
    assert_eq!(record.total_tokens(), 7);
  }
}
