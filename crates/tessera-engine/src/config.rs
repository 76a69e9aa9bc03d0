use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for engine sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound for a session to reach `Running`.
  pub start_timeout_ms: u64,
  /// Default upper bound for one synchronous execution.
  pub execution_timeout_ms: u64,
  /// Host the session endpoints bind to (on an ephemeral port).
  pub bind_host: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      start_timeout_ms: 30_000,
      execution_timeout_ms: 600_000,
      bind_host: "127.0.0.1".to_string(),
    }
  }
}

impl EngineConfig {
  pub fn start_timeout(&self) -> Duration {
    Duration::from_millis(self.start_timeout_ms)
  }

  pub fn execution_timeout(&self) -> Duration {
    Duration::from_millis(self.execution_timeout_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_config_uses_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{"start_timeout_ms": 50}"#).unwrap();
    assert_eq!(config.start_timeout(), Duration::from_millis(50));
    assert_eq!(config.execution_timeout_ms, 600_000);
    assert_eq!(config.bind_host, "127.0.0.1");
  }
}
