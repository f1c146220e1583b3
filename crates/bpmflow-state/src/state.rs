use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::log::{StateLog, StateLogLevel};
use crate::path::{ExecutionPath, StepRecord, StepStatus};
use crate::snapshot::{ProcessSnapshot, SNAPSHOT_FORMAT_VERSION};
use crate::value::values_equal;
use crate::variables::{Constants, Lookup, VariableStore};

/// What a task merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
  /// Names actually written; deep-equal values are skipped.
  pub written: Vec<String>,
  /// Whether a `Succeeded` record was appended for the task.
  pub completed: bool,
}

/// Variables, execution path, suspension flag and log of one process instance.
#[derive(Debug, Clone)]
pub struct ProcessState {
  instance_id: String,
  variables: VariableStore,
  path: ExecutionPath,
  suspended: bool,
  log: StateLog,
  constants: Constants,
}

impl ProcessState {
  pub fn new(instance_id: impl Into<String>, constants: Constants, log_level: StateLogLevel) -> Self {
    Self {
      instance_id: instance_id.into(),
      variables: VariableStore::new(),
      path: ExecutionPath::new(),
      suspended: false,
      log: StateLog::new(log_level),
      constants,
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  pub fn variables(&self) -> &VariableStore {
    &self.variables
  }

  pub fn variables_mut(&mut self) -> &mut VariableStore {
    &mut self.variables
  }

  pub fn path(&self) -> &ExecutionPath {
    &self.path
  }

  pub fn path_mut(&mut self) -> &mut ExecutionPath {
    &mut self.path
  }

  pub fn is_suspended(&self) -> bool {
    self.suspended
  }

  pub fn set_suspended(&mut self, suspended: bool) {
    self.suspended = suspended;
  }

  pub fn log(&self) -> &StateLog {
    &self.log
  }

  pub fn log_mut(&mut self) -> &mut StateLog {
    &mut self.log
  }

  pub fn constants(&self) -> &Constants {
    &self.constants
  }

  /// Resolve a variable: `scopes` (innermost first), then the latest write
  /// anywhere, then constants. An empty `scopes` skips straight to the latest write.
  pub fn get(&self, scopes: &[&str], name: &str) -> Lookup {
    match self
      .variables
      .resolve(scopes, name)
      .or_else(|| self.constants.get(name))
    {
      Some(value) => Lookup::Found(value.clone()),
      None => Lookup::Missing,
    }
  }

  /// Every name visible to a lookup, sorted.
  pub fn keys(&self) -> Vec<String> {
    let names: BTreeSet<&str> = self
      .variables
      .names()
      .chain(self.constants.names())
      .collect();
    names.into_iter().map(str::to_string).collect()
  }

  /// Record the step as a continuation when suspended. Returns whether it was deferred.
  pub fn defer_if_suspended(&mut self, source_id: Option<&str>, target_id: &str) -> bool {
    if !self.suspended {
      return false;
    }
    self.path.push_continuation(source_id, target_id);
    debug!(
      instance_id = %self.instance_id,
      target_id = %target_id,
      "step_deferred"
    );
    true
  }

  /// Merge the variables a task produced and mark it `Succeeded`.
  ///
  /// Only values that differ (deep equality) from what the task currently sees
  /// are written. Nothing happens unless the task is active, so repeating a
  /// merge never records a second completion.
  pub fn merge(
    &mut self,
    task_id: &str,
    scopes: &[&str],
    proposed: &BTreeMap<String, Value>,
    completed_by: Option<&str>,
  ) -> MergeOutcome {
    if !self.path.is_active(task_id) {
      return MergeOutcome::default();
    }

    let mut written = Vec::new();
    for (name, value) in proposed {
      let unchanged = match self.get(scopes, name) {
        Lookup::Found(current) => values_equal(&current, value),
        Lookup::Missing => false,
      };
      if !unchanged {
        self.variables.set(task_id, name, value.clone());
        written.push(name.clone());
      }
    }

    let source = self.path.last_source_of(task_id).map(str::to_string);
    self.path.push(
      StepRecord::new(source.as_deref(), task_id, StepStatus::Succeeded)
        .with_completed_by(completed_by.map(str::to_string)),
    );

    MergeOutcome {
      written,
      completed: true,
    }
  }

  pub fn export(&self) -> ProcessSnapshot {
    ProcessSnapshot {
      format_version: SNAPSHOT_FORMAT_VERSION,
      instance_id: self.instance_id.clone(),
      suspended: self.suspended,
      variables: self.variables.records(),
      steps: self.path.steps().to_vec(),
      timers: self.path.timers().to_vec(),
      continuations: self.path.continuations().to_vec(),
      join_arrivals: self.path.join_arrivals().clone(),
      log: self.log.entries().to_vec(),
    }
  }

  /// Replace everything but the constants and log threshold with a snapshot.
  pub fn restore(&mut self, snapshot: ProcessSnapshot) {
    self.instance_id = snapshot.instance_id;
    self.suspended = snapshot.suspended;
    self.variables = VariableStore::from_records(snapshot.variables);
    self.path = ExecutionPath::from_parts(
      snapshot.steps,
      snapshot.timers,
      snapshot.continuations,
      snapshot.join_arrivals,
    );
    self.log.replace_entries(snapshot.log);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn state() -> ProcessState {
    ProcessState::new(
      "instance-1",
      Constants::new(
        BTreeMap::new(),
        BTreeMap::from([("currency".to_string(), json!("EUR"))]),
      ),
      StateLogLevel::Info,
    )
  }

  fn vars(value: Value) -> BTreeMap<String, Value> {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_get_distinguishes_null_from_missing() {
    let mut state = state();
    state.variables_mut().set("start", "note", Value::Null);

    assert_eq!(state.get(&[], "note"), Lookup::Found(Value::Null));
    assert_eq!(state.get(&[], "other"), Lookup::Missing);
    assert_eq!(state.get(&["task"], "currency"), Lookup::Found(json!("EUR")));
  }

  #[test]
  fn test_merge_is_idempotent() {
    let mut state = state();
    state.variables_mut().set("start", "x", json!(1));
    state.path_mut().record(Some("f1"), "task", StepStatus::Started);
    let proposed = vars(json!({ "x": 1.0, "y": [1, 2] }));

    let first = state.merge("task", &["task", "process"], &proposed, None);
    assert_eq!(first.written, vec!["y"]);
    assert!(first.completed);

    let second = state.merge("task", &["task", "process"], &proposed, None);
    assert_eq!(second, MergeOutcome::default());

    let succeeded = state
      .path()
      .steps()
      .iter()
      .filter(|r| r.element_id == "task" && r.status == StepStatus::Succeeded)
      .count();
    assert_eq!(succeeded, 1);
    assert_eq!(state.variables().len(), 2);
  }

  #[test]
  fn test_merge_records_completer_and_source() {
    let mut state = state();
    state.path_mut().record(Some("f1"), "review", StepStatus::Started);

    state.merge("review", &["review"], &vars(json!({ "approved": true })), Some("alice"));

    let last = state.path().steps().last().unwrap();
    assert_eq!(last.completed_by.as_deref(), Some("alice"));
    assert_eq!(last.source_id.as_deref(), Some("f1"));
  }

  #[test]
  fn test_defer_only_when_suspended() {
    let mut state = state();
    assert!(!state.defer_if_suspended(None, "a"));

    state.set_suspended(true);
    assert!(state.defer_if_suspended(Some("f1"), "a"));
    assert_eq!(state.path().continuations().len(), 1);
  }

  #[test]
  fn test_keys_include_constants() {
    let mut state = state();
    state.variables_mut().set("start", "x", json!(1));

    assert_eq!(state.keys(), vec!["currency", "x"]);
  }

  #[test]
  fn test_export_restore() {
    let mut state = state();
    state.variables_mut().set("start", "x", json!(1));
    state.path_mut().record(None, "start", StepStatus::Started);
    state.log_mut().push(StateLogLevel::Info, "process started");
    state.set_suspended(true);

    let snapshot = state.export();
    let mut restored = ProcessState::new("other", Constants::default(), StateLogLevel::Info);
    restored.restore(snapshot);

    assert_eq!(restored.instance_id(), "instance-1");
    assert!(restored.is_suspended());
    assert_eq!(restored.get(&[], "x"), Lookup::Found(json!(1)));
    assert_eq!(restored.path().steps().len(), 1);
    assert_eq!(restored.log().entries().len(), 1);
  }
}
