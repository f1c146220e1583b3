//! Serializable definition documents.
//!
//! A document is what a host produces after parsing its process model. It can
//! be loaded from JSON:
//!
//! ```json
//! {
//!   "id": "orders",
//!   "variables": { "max_retries": 3 },
//!   "processes": [{
//!     "id": "order_process",
//!     "elements": [
//!       { "id": "start", "type": "start_event" },
//!       { "id": "f1", "type": "sequence_flow", "source": "start", "target": "charge" },
//!       { "id": "charge", "type": "task", "kind": "service" },
//!       { "id": "f2", "type": "sequence_flow", "source": "charge", "target": "end" },
//!       { "id": "end", "type": "end_event" }
//!     ]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::element::{GatewayKind, TaskCatch, TaskKind, TimerDef};

/// Root of one loaded process model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  /// Definition-level variables, visible to every element as constants.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub variables: BTreeMap<String, Value>,
  #[serde(default)]
  pub processes: Vec<ProcessDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub message_flows: Vec<MessageFlowDef>,
}

impl DefinitionDocument {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDef {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, Value>,
  #[serde(default)]
  pub elements: Vec<ElementDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDef {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(flatten)]
  pub kind: ElementDefKind,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDefKind {
  StartEvent,
  EndEvent,
  IntermediateCatchEvent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    error_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timer: Option<TimerDef>,
  },
  IntermediateThrowEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timer: Option<TimerDef>,
  },
  Gateway {
    kind: GatewayKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_flow: Option<String>,
  },
  Task {
    #[serde(default)]
    kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lane: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    catches: Vec<TaskCatch>,
  },
  SubProcess {
    #[serde(default)]
    elements: Vec<ElementDef>,
  },
  SequenceFlow {
    source: String,
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
  },
}

/// A message flow between elements of (usually different) processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFlowDef {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub source: String,
  pub target: String,
}
