use tessera_engine::EngineError;
use tessera_store::{QueueError, StateError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
  /// Compile, start and execution errors, unchanged.
  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("run state: {0}")]
  State(#[from] StateError),

  /// The run ended with a failure event.
  #[error("run failed: {message}")]
  RunFailed {
    node_id: Option<String>,
    message: String,
  },
}

impl ManagerError {
  pub fn not_running() -> Self {
    Self::Engine(EngineError::NotRunning)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum BackflowError {
  #[error(transparent)]
  Queue(#[from] QueueError),

  #[error("backflow record rejected: {message}")]
  Rejected { message: String },
}
