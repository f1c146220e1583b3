//! Variable views handed to hooks and task handlers.
//!
//! A view is a snapshot taken under the state lock: holding one never blocks
//! the instance.

use std::collections::BTreeMap;

use bpmflow_state::{Lookup, ProcessState};
use serde_json::{Map, Value};

/// Everything visible from one scope, resolved at capture time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOnlyVariables {
  scope: Option<String>,
  values: BTreeMap<String, Value>,
}

impl ReadOnlyVariables {
  /// Resolve every visible name through `scopes` (innermost first).
  pub(crate) fn capture(state: &ProcessState, scopes: &[&str]) -> Self {
    let values = state
      .keys()
      .into_iter()
      .filter_map(|name| match state.get(scopes, &name) {
        Lookup::Found(value) => Some((name, value)),
        Lookup::Missing => None,
      })
      .collect();
    Self {
      scope: scopes.first().map(|s| s.to_string()),
      values,
    }
  }

  pub(crate) fn from_values(scope: Option<&str>, values: BTreeMap<String, Value>) -> Self {
    Self {
      scope: scope.map(str::to_string),
      values,
    }
  }

  /// Element id the view was resolved from.
  pub fn scope(&self) -> Option<&str> {
    self.scope.as_deref()
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  pub fn lookup(&self, name: &str) -> Lookup {
    match self.values.get(name) {
      Some(value) => Lookup::Found(value.clone()),
      None => Lookup::Missing,
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    self.values.contains_key(name)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// The view as a JSON object.
  pub fn to_value(&self) -> Value {
    Value::Object(
      self
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Map<_, _>>(),
    )
  }
}

/// A task's writable view. Writes are collected and merged when the task completes.
#[derive(Debug, Clone, Default)]
pub struct Variables {
  base: ReadOnlyVariables,
  changes: BTreeMap<String, Value>,
}

impl Variables {
  pub(crate) fn new(base: ReadOnlyVariables) -> Self {
    Self {
      base,
      changes: BTreeMap::new(),
    }
  }

  pub fn scope(&self) -> Option<&str> {
    self.base.scope()
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.changes.get(name).or_else(|| self.base.get(name))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.changes.contains_key(name) || self.base.contains(name)
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.changes.insert(name.into(), value.into());
  }

  /// Names visible through the view, including new ones.
  pub fn keys(&self) -> Vec<&str> {
    let mut keys: Vec<&str> = self
      .base
      .keys()
      .chain(self.changes.keys().map(String::as_str))
      .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
  }

  /// Values written through this view.
  pub fn changes(&self) -> &BTreeMap<String, Value> {
    &self.changes
  }

  pub fn into_changes(self) -> BTreeMap<String, Value> {
    self.changes
  }

  /// The view, with writes applied, as a JSON object.
  pub fn to_value(&self) -> Value {
    let mut value = self.base.to_value();
    if let Value::Object(map) = &mut value {
      for (k, v) in &self.changes {
        map.insert(k.clone(), v.clone());
      }
    }
    value
  }
}
