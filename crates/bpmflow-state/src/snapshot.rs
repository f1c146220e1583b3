use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::log::LogEntry;
use crate::path::{Continuation, PendingTimer, StepRecord};
use crate::variables::VariableRecord;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Serialized process state, the durability contract between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
  pub format_version: u32,
  pub instance_id: String,
  pub suspended: bool,
  #[serde(default)]
  pub variables: Vec<VariableRecord>,
  #[serde(default)]
  pub steps: Vec<StepRecord>,
  #[serde(default)]
  pub timers: Vec<PendingTimer>,
  #[serde(default)]
  pub continuations: Vec<Continuation>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub join_arrivals: BTreeMap<String, Vec<String>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub log: Vec<LogEntry>,
}

impl ProcessSnapshot {
  pub fn to_json(&self) -> Result<String, StateError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn from_json(json: &str) -> Result<Self, StateError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Every element id the snapshot refers to.
  pub fn element_ids(&self) -> BTreeSet<&str> {
    let mut ids = BTreeSet::new();
    ids.extend(self.variables.iter().map(|v| v.scope.as_str()));
    for step in &self.steps {
      ids.insert(step.element_id.as_str());
      ids.extend(step.source_id.as_deref());
      ids.extend(step.outgoing.iter().map(String::as_str));
    }
    for timer in &self.timers {
      ids.insert(timer.element_id.as_str());
      ids.extend(timer.source_id.as_deref());
    }
    for continuation in &self.continuations {
      ids.insert(continuation.target_id.as_str());
      ids.extend(continuation.source_id.as_deref());
    }
    for (gateway, flows) in &self.join_arrivals {
      ids.insert(gateway.as_str());
      ids.extend(flows.iter().map(String::as_str));
    }
    ids
  }

  /// Check the format version and that `contains` knows every referenced element.
  pub fn check(&self, contains: impl Fn(&str) -> bool) -> Result<(), StateError> {
    if self.format_version != SNAPSHOT_FORMAT_VERSION {
      return Err(StateError::UnsupportedVersion {
        found: self.format_version,
        expected: SNAPSHOT_FORMAT_VERSION,
      });
    }
    match self.element_ids().into_iter().find(|id| !contains(id)) {
      Some(id) => Err(StateError::UnknownElement {
        element_id: id.to_string(),
      }),
      None => Ok(()),
    }
  }
}
