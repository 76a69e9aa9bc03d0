//! Publish-mode run results handed to downstream data collection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_store::{QueueItem, TaskQueue};
use tracing::debug;

use crate::error::BackflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
  /// A full application run.
  App,
  /// A single-node run.
  Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackflowRecord {
  pub app_id: String,
  pub app_name: String,
  pub module_id: String,
  pub module_name: String,
  pub module_type: ModuleType,
  pub output_time: DateTime<Utc>,
  pub module_input: String,
  pub module_output: String,
  pub conversation_id: String,
  pub turn_number: u32,
}

#[async_trait]
pub trait BackflowSink: Send + Sync {
  async fn send(&self, record: BackflowRecord) -> Result<(), BackflowError>;
}

/// Discards every record.
#[derive(Debug, Clone, Default)]
pub struct NoopBackflowSink;

#[async_trait]
impl BackflowSink for NoopBackflowSink {
  async fn send(&self, _record: BackflowRecord) -> Result<(), BackflowError> {
    Ok(())
  }
}

/// Pushes records onto a [`TaskQueue`] for an out-of-process consumer.
#[derive(Debug, Clone)]
pub struct QueueBackflowSink {
  queue: TaskQueue,
}

impl QueueBackflowSink {
  pub fn new(queue: TaskQueue) -> Self {
    Self { queue }
  }
}

#[async_trait]
impl BackflowSink for QueueBackflowSink {
  async fn send(&self, record: BackflowRecord) -> Result<(), BackflowError> {
    let payload = serde_json::to_value(&record).map_err(|e| BackflowError::Rejected {
      message: e.to_string(),
    })?;
    let item = QueueItem::new(payload);
    self.queue.push(&item).await?;
    debug!(
      queue = %self.queue.name(),
      app_id = %record.app_id,
      module_id = %record.module_id,
      "backflow_queued"
    );
    Ok(())
  }
}
