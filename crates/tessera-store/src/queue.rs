use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{KvError, QueueError};
use crate::kv::KvStore;

/// One unit of work on a [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  pub task_id: String,
  pub payload: Value,
}

impl QueueItem {
  /// An item with a fresh task id.
  pub fn new(payload: Value) -> Self {
    Self {
      task_id: uuid::Uuid::new_v4().to_string(),
      payload,
    }
  }
}

/// FIFO queue stored as a list under `task_queue:{name}`.
///
/// `push` never blocks and never drops; `pop` returns `None` instead of
/// waiting when the queue is empty.
#[derive(Clone)]
pub struct TaskQueue {
  store: Arc<dyn KvStore>,
  name: String,
  key: String,
}

impl TaskQueue {
  pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      store,
      key: format!("task_queue:{}", name),
      name,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn push(&self, item: &QueueItem) -> Result<(), QueueError> {
    let encoded = serde_json::to_string(item).map_err(|source| self.corrupt(source))?;
    self
      .store
      .list_push(&self.key, encoded)
      .await
      .map_err(|source| self.unavailable(source))?;
    debug!(queue = %self.name, task_id = %item.task_id, "queue_pushed");
    Ok(())
  }

  pub async fn pop(&self) -> Result<Option<QueueItem>, QueueError> {
    let Some(encoded) = self
      .store
      .list_pop(&self.key)
      .await
      .map_err(|source| self.unavailable(source))?
    else {
      return Ok(None);
    };

    let item: QueueItem = serde_json::from_str(&encoded).map_err(|source| self.corrupt(source))?;
    debug!(queue = %self.name, task_id = %item.task_id, "queue_popped");
    Ok(Some(item))
  }

  /// Drop every queued item.
  pub async fn clear(&self) -> Result<(), QueueError> {
    self
      .store
      .delete(&self.key)
      .await
      .map_err(|source| self.unavailable(source))
  }

  pub async fn len(&self) -> Result<usize, QueueError> {
    self
      .store
      .list_len(&self.key)
      .await
      .map_err(|source| self.unavailable(source))
  }

  pub async fn is_empty(&self) -> Result<bool, QueueError> {
    Ok(self.len().await? == 0)
  }

  fn unavailable(&self, source: KvError) -> QueueError {
    QueueError::Unavailable {
      queue: self.name.clone(),
      source,
    }
  }

  fn corrupt(&self, source: serde_json::Error) -> QueueError {
    QueueError::Corrupt {
      queue: self.name.clone(),
      source,
    }
  }
}

impl std::fmt::Debug for TaskQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskQueue").field("name", &self.name).finish()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use async_trait::async_trait;
  use serde_json::json;

  use super::*;
  use crate::kv::InMemoryKvStore;

  /// Backend that is always down.
  struct DownStore;

  #[async_trait]
  impl KvStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn set(&self, _key: &str, _value: String) -> Result<(), KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn delete(&self, _key: &str) -> Result<(), KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn hash_set(&self, _key: &str, _field: &str, _value: String) -> Result<(), KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn hash_get(&self, _key: &str, _field: &str) -> Result<Option<String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn list_push(&self, _key: &str, _value: String) -> Result<(), KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn list_pop(&self, _key: &str) -> Result<Option<String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn list_len(&self, _key: &str) -> Result<usize, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn list_range(&self, _key: &str, _start: usize) -> Result<Vec<String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
    async fn incr_by(&self, _key: &str, _delta: i64) -> Result<i64, KvError> {
      Err(KvError::unavailable("connection refused"))
    }
  }

  fn queue() -> TaskQueue {
    TaskQueue::new(Arc::new(InMemoryKvStore::new()), "backflow")
  }

  #[tokio::test]
  async fn test_push_pop_in_order() {
    let queue = queue();
    let first = QueueItem::new(json!({"n": 1}));
    let second = QueueItem::new(json!({"n": 2}));

    queue.push(&first).await.unwrap();
    queue.push(&second).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);

    assert_eq!(queue.pop().await.unwrap(), Some(first));
    assert_eq!(queue.pop().await.unwrap(), Some(second));
  }

  #[tokio::test]
  async fn test_pop_empty_returns_none() {
    let queue = queue();
    assert_eq!(queue.pop().await.unwrap(), None);
    assert!(queue.is_empty().await.unwrap());
  }

  #[tokio::test]
  async fn test_clear() {
    let queue = queue();
    queue.push(&QueueItem::new(json!(1))).await.unwrap();
    queue.push(&QueueItem::new(json!(2))).await.unwrap();

    queue.clear().await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.pop().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_backend_failure_is_unavailable() {
    let queue = TaskQueue::new(Arc::new(DownStore), "backflow");

    let err = queue.push(&QueueItem::new(json!(1))).await.unwrap_err();
    assert!(matches!(err, QueueError::Unavailable { ref queue, .. } if queue == "backflow"));

    let err = queue.pop().await.unwrap_err();
    assert!(matches!(err, QueueError::Unavailable { .. }));
  }

  #[tokio::test]
  async fn test_corrupt_item() {
    let store = Arc::new(InMemoryKvStore::new());
    store
      .list_push("task_queue:backflow", "not json".to_string())
      .await
      .unwrap();
    let queue = TaskQueue::new(store, "backflow");

    assert!(matches!(
      queue.pop().await,
      Err(QueueError::Corrupt { .. })
    ));
  }
}
