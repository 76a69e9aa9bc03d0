//! Run events and notifiers.
//!
//! Events are emitted during a run so consumers can stream progress, persist
//! run state, feed billing, etc.

use serde::{Deserialize, Serialize};
use tessera_workflow::NodeRunRecord;
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
  /// A node started running, or finished (succeeded or failed).
  Node(NodeRunRecord),

  /// Partial output from a streaming-capable node.
  Chunk { node_id: String, chunk: String },

  /// The run finished; always the last event of a successful run.
  Finished { output: serde_json::Value },

  /// The run failed; always the last event of a failed run.
  Failed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    message: String,
  },
}

impl RunEvent {
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunEvent::Finished { .. } | RunEvent::Failed { .. })
  }
}

/// Trait for receiving run events.
///
/// The runtime calls `notify` for each event - implementations decide what to
/// do with them (stream, persist, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when a run event occurs.
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the scheduler. Volume is one
  // event per node plus chunks.
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_node_event_keeps_record_shape() {
    let record = NodeRunRecord {
      node_id: "a".to_string(),
      node_type: "template".to_string(),
      title: "A".to_string(),
      inputs: json!(1),
      outputs: json!(2),
      status: tessera_workflow::NodeStatus::Succeeded,
      elapsed_time: 0.0,
      prompt_tokens: 0,
      completion_tokens: 0,
    };
    let value = serde_json::to_value(RunEvent::Node(record)).unwrap();
    assert_eq!(value["event"], "node");
    assert_eq!(value["node_id"], "a");
    assert_eq!(value["status"], "succeeded");
  }

  #[tokio::test]
  async fn test_channel_notifier_ignores_closed_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    ChannelNotifier::new(tx).notify(RunEvent::Finished { output: json!(1) });
  }
}
