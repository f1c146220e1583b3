use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a variable lookup. A stored `null` is `Found(Value::Null)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
  Found(Value),
  Missing,
}

impl Lookup {
  pub fn is_found(&self) -> bool {
    matches!(self, Lookup::Found(_))
  }

  pub fn found(self) -> Option<Value> {
    match self {
      Lookup::Found(value) => Some(value),
      Lookup::Missing => None,
    }
  }
}

/// One stored variable, as exported in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
  pub scope: String,
  pub name: String,
  pub value: Value,
  /// Write sequence number; higher is more recent.
  pub seq: u64,
}

#[derive(Debug, Clone)]
struct Slot {
  value: Value,
  seq: u64,
}

/// Values keyed by (scope element id, name).
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
  // name -> scope -> slot
  entries: BTreeMap<String, BTreeMap<String, Slot>>,
  next_seq: u64,
}

impl VariableStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// The value stored exactly under `(scope, name)`.
  pub fn get_exact(&self, scope: &str, name: &str) -> Option<&Value> {
    self
      .entries
      .get(name)
      .and_then(|scopes| scopes.get(scope))
      .map(|slot| &slot.value)
  }

  /// The most recent write of `name` in any scope.
  pub fn latest(&self, name: &str) -> Option<&Value> {
    self
      .entries
      .get(name)
      .and_then(|scopes| scopes.values().max_by_key(|slot| slot.seq))
      .map(|slot| &slot.value)
  }

  /// Resolve `name` through `scopes` (innermost first), then the latest write anywhere.
  pub fn resolve(&self, scopes: &[&str], name: &str) -> Option<&Value> {
    scopes
      .iter()
      .find_map(|scope| self.get_exact(scope, name))
      .or_else(|| self.latest(name))
  }

  pub fn set(&mut self, scope: &str, name: &str, value: Value) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self
      .entries
      .entry(name.to_string())
      .or_default()
      .insert(scope.to_string(), Slot { value, seq });
  }

  /// Names with at least one stored value.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Every stored value, oldest write first.
  pub fn records(&self) -> Vec<VariableRecord> {
    let mut records: Vec<VariableRecord> = self
      .entries
      .iter()
      .flat_map(|(name, scopes)| {
        scopes.iter().map(move |(scope, slot)| VariableRecord {
          scope: scope.clone(),
          name: name.clone(),
          value: slot.value.clone(),
          seq: slot.seq,
        })
      })
      .collect();
    records.sort_by_key(|r| r.seq);
    records
  }

  pub fn from_records(records: impl IntoIterator<Item = VariableRecord>) -> Self {
    let mut store = Self::new();
    for record in records {
      store.next_seq = store.next_seq.max(record.seq + 1);
      store
        .entries
        .entry(record.name)
        .or_default()
        .insert(
          record.scope,
          Slot {
            value: record.value,
            seq: record.seq,
          },
        );
    }
    store
  }
}

/// Read-only values consulted after the store: host runtime constants first,
/// then definition-level variables.
#[derive(Debug, Clone, Default)]
pub struct Constants {
  layers: Vec<BTreeMap<String, Value>>,
}

impl Constants {
  pub fn new(runtime: BTreeMap<String, Value>, definition: BTreeMap<String, Value>) -> Self {
    Self {
      layers: vec![runtime, definition],
    }
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.layers.iter().find_map(|layer| layer.get(name))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self
      .layers
      .iter()
      .flat_map(|layer| layer.keys().map(String::as_str))
  }
}
