//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bpmflow_engine::{ElementGraph, StepRecord, StepStatus};
use parking_lot::Mutex;
use serde_json::Value;

pub fn graph(definition: Value) -> ElementGraph {
  ElementGraph::from_json(&definition.to_string()).expect("definition should be valid")
}

pub fn vars(value: Value) -> BTreeMap<String, Value> {
  serde_json::from_value(value).expect("variables should be an object")
}

/// Every `Succeeded`/`Failed` record follows a `Started` record for the same
/// element, and no element succeeds twice.
pub fn assert_path_invariants(steps: &[StepRecord]) {
  let mut started: HashMap<&str, usize> = HashMap::new();
  let mut succeeded: HashMap<&str, usize> = HashMap::new();
  for step in steps {
    let id = step.element_id.as_str();
    match step.status {
      StepStatus::Started => *started.entry(id).or_default() += 1,
      StepStatus::Succeeded | StepStatus::Failed => {
        assert!(
          started.get(id).copied().unwrap_or_default() > 0,
          "{id} finished without a prior started record"
        );
        if step.status == StepStatus::Succeeded {
          let count = succeeded.entry(id).or_default();
          *count += 1;
          assert_eq!(*count, 1, "{id} succeeded more than once");
        }
      }
      StepStatus::Suspended => {}
    }
  }
}

pub fn count_status(steps: &[StepRecord], element_id: &str, status: StepStatus) -> usize {
  steps
    .iter()
    .filter(|s| s.element_id == element_id && s.status == status)
    .count()
}

/// Collects strings from hooks running on any thread.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
  pub fn push(&self, entry: impl Into<String>) {
    self.0.lock().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().clone()
  }

  pub fn count(&self, entry: &str) -> usize {
    self.0.lock().iter().filter(|e| *e == entry).count()
  }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: std::time::Duration, condition: impl Fn() -> bool) -> bool {
  let deadline = std::time::Instant::now() + timeout;
  while std::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(std::time::Duration::from_millis(10));
  }
  condition()
}
