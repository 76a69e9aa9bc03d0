use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tessera_engine::EngineExecutor;

pub(crate) type Slot = Arc<tokio::sync::Mutex<Option<Arc<EngineExecutor>>>>;

/// Live executors by session key, shared by every [`RunManager`](crate::RunManager).
///
/// Each key owns an async mutex; starting, stopping and replacing the
/// executor of a key all happen while holding it.
#[derive(Clone, Default)]
pub struct SessionRegistry {
  slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl SessionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn slot(&self, key: &str) -> Slot {
    self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(key.to_string())
      .or_default()
      .clone()
  }

  /// Non-blocking liveness probe: `None` while the key is being started or
  /// stopped.
  pub fn probe(&self, key: &str) -> Option<bool> {
    let slot = self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned();
    let Some(slot) = slot else {
      return Some(false);
    };
    let guard = slot.try_lock().ok()?;
    Some(guard.as_ref().is_some_and(|e| e.is_engine_running()))
  }

  /// Forget the slot of `key` once it holds no executor and nobody else is
  /// holding or waiting on it.
  pub(crate) fn release(&self, key: &str) {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    // new references are only handed out under the map lock
    let idle = slots.get(key).is_some_and(|slot| {
      Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|guard| guard.is_none())
    });
    if idle {
      slots.remove(key);
    }
  }

  /// Number of keys with a slot, live or not.
  pub fn tracked_keys(&self) -> usize {
    self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Number of keys with a running session, skipping keys that are busy.
  pub fn live_count(&self) -> usize {
    let slots: Vec<Slot> = self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();

    slots
      .iter()
      .filter(|slot| {
        slot
          .try_lock()
          .is_ok_and(|guard| guard.as_ref().is_some_and(|e| e.is_engine_running()))
      })
      .count()
  }
}

impl std::fmt::Debug for SessionRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionRegistry")
      .field("live", &self.live_count())
      .finish()
  }
}
