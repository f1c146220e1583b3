use std::collections::BTreeMap;
use std::time::Duration;

use bpmflow_state::StateLogLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine settings, loadable from JSON. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound of the wait in `suspend()`.
  pub suspend_timeout_ms: u64,
  /// Threshold of the log kept with the process state.
  pub state_log_level: StateLogLevel,
  /// Host runtime constants, looked up before definition-level variables.
  pub constants: BTreeMap<String, Value>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      suspend_timeout_ms: 5000,
      state_log_level: StateLogLevel::None,
      constants: BTreeMap::new(),
    }
  }
}

impl EngineConfig {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  pub fn suspend_timeout(&self) -> Duration {
    Duration::from_millis(self.suspend_timeout_ms)
  }
}
