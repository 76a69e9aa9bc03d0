use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::KvError;

/// Minimal Redis-style cache interface.
///
/// Values are strings; callers serialize structured data as JSON.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

  async fn set(&self, key: &str, value: String) -> Result<(), KvError>;

  /// Remove a key of any type. Missing keys are not an error.
  async fn delete(&self, key: &str) -> Result<(), KvError>;

  async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), KvError>;

  async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

  async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

  /// Append to the tail of a list.
  async fn list_push(&self, key: &str, value: String) -> Result<(), KvError>;

  /// Remove from the head of a list; `None` when empty.
  async fn list_pop(&self, key: &str) -> Result<Option<String>, KvError>;

  async fn list_len(&self, key: &str) -> Result<usize, KvError>;

  /// Items from index `start` to the tail, oldest first.
  async fn list_range(&self, key: &str, start: usize) -> Result<Vec<String>, KvError>;

  /// Every key of any type starting with `prefix`, sorted.
  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

  /// Atomically add `delta` to an integer counter, returning the new value.
  async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError>;
}

#[derive(Debug, Clone)]
enum Entry {
  Value(String),
  Hash(HashMap<String, String>),
  List(VecDeque<String>),
}

/// Process-local [`KvStore`].
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
  entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

pub(crate) fn wrong_type(key: &str, expected: &'static str) -> KvError {
  KvError::WrongType {
    key: key.to_string(),
    expected,
  }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
    match self.entries().get(key) {
      None => Ok(None),
      Some(Entry::Value(value)) => Ok(Some(value.clone())),
      Some(_) => Err(wrong_type(key, "string")),
    }
  }

  async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
    self.entries().insert(key.to_string(), Entry::Value(value));
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), KvError> {
    self.entries().remove(key);
    Ok(())
  }

  async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), KvError> {
    let mut entries = self.entries();
    match entries
      .entry(key.to_string())
      .or_insert_with(|| Entry::Hash(HashMap::new()))
    {
      Entry::Hash(hash) => {
        hash.insert(field.to_string(), value);
        Ok(())
      }
      _ => Err(wrong_type(key, "hash")),
    }
  }

  async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
    match self.entries().get(key) {
      None => Ok(None),
      Some(Entry::Hash(hash)) => Ok(hash.get(field).cloned()),
      Some(_) => Err(wrong_type(key, "hash")),
    }
  }

  async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
    match self.entries().get(key) {
      None => Ok(HashMap::new()),
      Some(Entry::Hash(hash)) => Ok(hash.clone()),
      Some(_) => Err(wrong_type(key, "hash")),
    }
  }

  async fn list_push(&self, key: &str, value: String) -> Result<(), KvError> {
    let mut entries = self.entries();
    match entries
      .entry(key.to_string())
      .or_insert_with(|| Entry::List(VecDeque::new()))
    {
      Entry::List(list) => {
        list.push_back(value);
        Ok(())
      }
      _ => Err(wrong_type(key, "list")),
    }
  }

  async fn list_pop(&self, key: &str) -> Result<Option<String>, KvError> {
    let mut entries = self.entries();
    let popped = match entries.get_mut(key) {
      None => return Ok(None),
      Some(Entry::List(list)) => list.pop_front(),
      Some(_) => return Err(wrong_type(key, "list")),
    };
    // empty lists do not linger, as in Redis
    if matches!(entries.get(key), Some(Entry::List(list)) if list.is_empty()) {
      entries.remove(key);
    }
    Ok(popped)
  }

  async fn list_len(&self, key: &str) -> Result<usize, KvError> {
    match self.entries().get(key) {
      None => Ok(0),
      Some(Entry::List(list)) => Ok(list.len()),
      Some(_) => Err(wrong_type(key, "list")),
    }
  }

  async fn list_range(&self, key: &str, start: usize) -> Result<Vec<String>, KvError> {
    match self.entries().get(key) {
      None => Ok(Vec::new()),
      Some(Entry::List(list)) => Ok(list.iter().skip(start).cloned().collect()),
      Some(_) => Err(wrong_type(key, "list")),
    }
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
    let mut keys: Vec<String> = self
      .entries()
      .keys()
      .filter(|key| key.starts_with(prefix))
      .cloned()
      .collect();
    keys.sort();
    Ok(keys)
  }

  async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
    let mut entries = self.entries();
    let current = match entries.get(key) {
      None => 0,
      Some(Entry::Value(value)) => value
        .parse::<i64>()
        .map_err(|_| wrong_type(key, "integer"))?,
      Some(_) => return Err(wrong_type(key, "integer")),
    };
    let next = current + delta;
    entries.insert(key.to_string(), Entry::Value(next.to_string()));
    Ok(next)
  }
}
