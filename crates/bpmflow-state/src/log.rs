use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Threshold of the state log. `None` keeps nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLogLevel {
  #[default]
  None,
  Error,
  Warn,
  Info,
  Debug,
}

impl StateLogLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      StateLogLevel::None => "none",
      StateLogLevel::Error => "error",
      StateLogLevel::Warn => "warn",
      StateLogLevel::Info => "info",
      StateLogLevel::Debug => "debug",
    }
  }
}

impl std::str::FromStr for StateLogLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "none" => Ok(StateLogLevel::None),
      "error" => Ok(StateLogLevel::Error),
      "warn" => Ok(StateLogLevel::Warn),
      "info" => Ok(StateLogLevel::Info),
      "debug" => Ok(StateLogLevel::Debug),
      other => Err(format!("unknown state log level '{other}'")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
  pub timestamp: DateTime<Utc>,
  pub level: StateLogLevel,
  pub message: String,
}

/// Log lines kept with the process state and exported in snapshots.
#[derive(Debug, Clone, Default)]
pub struct StateLog {
  threshold: StateLogLevel,
  entries: Vec<LogEntry>,
}

impl StateLog {
  pub fn new(threshold: StateLogLevel) -> Self {
    Self {
      threshold,
      entries: Vec::new(),
    }
  }

  pub fn threshold(&self) -> StateLogLevel {
    self.threshold
  }

  pub fn accepts(&self, level: StateLogLevel) -> bool {
    level != StateLogLevel::None && level <= self.threshold
  }

  /// Append a line if `level` is within the threshold. Returns whether it was kept.
  pub fn push(&mut self, level: StateLogLevel, message: impl Into<String>) -> bool {
    if !self.accepts(level) {
      return false;
    }
    self.entries.push(LogEntry {
      timestamp: Utc::now(),
      level,
      message: message.into(),
    });
    true
  }

  pub fn entries(&self) -> &[LogEntry] {
    &self.entries
  }

  pub(crate) fn replace_entries(&mut self, entries: Vec<LogEntry>) {
    self.entries = entries;
  }
}
