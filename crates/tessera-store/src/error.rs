/// Error from the key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
  /// The backend could not be reached or refused the operation.
  #[error("key-value store unavailable: {message}")]
  Unavailable { message: String },

  /// The key holds a different kind of value.
  #[error("key {key} does not hold a {expected}")]
  WrongType { key: String, expected: &'static str },
}

impl KvError {
  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::Unavailable {
      message: message.into(),
    }
  }
}

/// Error writing run state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error(transparent)]
  Store(#[from] KvError),

  #[error("failed to serialize run state: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Error from a [`TaskQueue`](crate::TaskQueue).
///
/// The queue never retries; reconnect policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("queue {queue} unavailable: {source}")]
  Unavailable {
    queue: String,
    #[source]
    source: KvError,
  },

  #[error("corrupt item in queue {queue}: {source}")]
  Corrupt {
    queue: String,
    #[source]
    source: serde_json::Error,
  },
}
