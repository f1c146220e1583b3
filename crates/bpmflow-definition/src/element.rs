use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catch type that matches any raised fault.
pub const WILDCARD_ERROR_TYPE: &str = "*";

/// Branch-selection rule of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
  /// First accepted outgoing flow, else the default flow.
  Exclusive,
  /// Every outgoing flow, unconditionally.
  Parallel,
  /// Every accepted outgoing flow, else the default flow.
  Inclusive,
  /// Evaluated like an inclusive gateway.
  Complex,
}

/// The closed set of task variants. Each kind maps to one host handler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  #[default]
  Generic,
  User,
  Manual,
  Service,
  Send,
  Receive,
  Script,
  BusinessRule,
}

impl TaskKind {
  pub const ALL: [TaskKind; 8] = [
    TaskKind::Generic,
    TaskKind::User,
    TaskKind::Manual,
    TaskKind::Service,
    TaskKind::Send,
    TaskKind::Receive,
    TaskKind::Script,
    TaskKind::BusinessRule,
  ];

  /// User and manual tasks complete later, through a completion handle.
  pub fn is_asynchronous(self) -> bool {
    matches!(self, TaskKind::User | TaskKind::Manual)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      TaskKind::Generic => "task",
      TaskKind::User => "user_task",
      TaskKind::Manual => "manual_task",
      TaskKind::Service => "service_task",
      TaskKind::Send => "send_task",
      TaskKind::Receive => "receive_task",
      TaskKind::Script => "script_task",
      TaskKind::BusinessRule => "business_rule_task",
    }
  }
}

/// Delay declared on an intermediate event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerDef {
  /// Fixed delay in milliseconds.
  Duration { ms: u64 },
  /// Delay in milliseconds read from a variable when the event is reached.
  Variable { name: String },
}

/// Task-local error handling: where to go when this task fails with one of `error_types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCatch {
  pub error_types: Vec<String>,
  pub target: String,
}

/// Type-specific data of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
  Process,
  SubProcess,
  StartEvent,
  EndEvent,
  IntermediateCatchEvent {
    error_types: Vec<String>,
    timer: Option<TimerDef>,
  },
  IntermediateThrowEvent {
    timer: Option<TimerDef>,
  },
  Gateway {
    kind: GatewayKind,
    default_flow: Option<String>,
  },
  Task {
    kind: TaskKind,
    lane: Option<String>,
    catches: Vec<TaskCatch>,
  },
  SequenceFlow {
    source: String,
    target: String,
    condition: Option<String>,
  },
  MessageFlow {
    source: String,
    target: String,
  },
}

/// One node of the element graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
  pub id: String,
  pub name: Option<String>,
  pub kind: ElementKind,
  /// Enclosing container (Process or SubProcess). `None` for processes and message flows.
  pub parent: Option<String>,
  /// Owning top-level process. A process owns itself; a message flow belongs to its source's process.
  pub process: String,
  /// Free-form data the host reads (script bodies, service names, ...).
  pub properties: BTreeMap<String, Value>,
}

impl Element {
  pub fn is_flow(&self) -> bool {
    matches!(
      self.kind,
      ElementKind::SequenceFlow { .. } | ElementKind::MessageFlow { .. }
    )
  }

  pub fn is_event(&self) -> bool {
    matches!(
      self.kind,
      ElementKind::StartEvent
        | ElementKind::EndEvent
        | ElementKind::IntermediateCatchEvent { .. }
        | ElementKind::IntermediateThrowEvent { .. }
    )
  }

  pub fn is_task(&self) -> bool {
    matches!(self.kind, ElementKind::Task { .. })
  }

  pub fn task_kind(&self) -> Option<TaskKind> {
    match &self.kind {
      ElementKind::Task { kind, .. } => Some(*kind),
      _ => None,
    }
  }

  pub fn lane(&self) -> Option<&str> {
    match &self.kind {
      ElementKind::Task { lane, .. } => lane.as_deref(),
      _ => None,
    }
  }

  /// Timer declared on an intermediate event.
  pub fn timer(&self) -> Option<&TimerDef> {
    match &self.kind {
      ElementKind::IntermediateCatchEvent { timer, .. }
      | ElementKind::IntermediateThrowEvent { timer } => timer.as_ref(),
      _ => None,
    }
  }

  /// Error types an intermediate catch event declares. Empty for every other element.
  pub fn error_types(&self) -> &[String] {
    match &self.kind {
      ElementKind::IntermediateCatchEvent { error_types, .. } => error_types,
      _ => &[],
    }
  }

  /// Source and target of a sequence or message flow.
  pub fn flow_endpoints(&self) -> Option<(&str, &str)> {
    match &self.kind {
      ElementKind::SequenceFlow { source, target, .. } | ElementKind::MessageFlow { source, target } => {
        Some((source, target))
      }
      _ => None,
    }
  }

  pub fn condition(&self) -> Option<&str> {
    match &self.kind {
      ElementKind::SequenceFlow { condition, .. } => condition.as_deref(),
      _ => None,
    }
  }

  /// Task-local catch target for a fault identified by any of `names`.
  ///
  /// Catches are checked in declaration order; within one catch an exact name
  /// and the wildcard are equally good.
  pub fn catch_target<'a>(&'a self, names: &[&str]) -> Option<&'a str> {
    let ElementKind::Task { catches, .. } = &self.kind else {
      return None;
    };
    catches
      .iter()
      .find(|catch| {
        catch
          .error_types
          .iter()
          .any(|t| t == WILDCARD_ERROR_TYPE || names.contains(&t.as_str()))
      })
      .map(|catch| catch.target.as_str())
  }

  /// Short type name used in logs and error messages.
  pub fn kind_name(&self) -> &'static str {
    match &self.kind {
      ElementKind::Process => "process",
      ElementKind::SubProcess => "sub_process",
      ElementKind::StartEvent => "start_event",
      ElementKind::EndEvent => "end_event",
      ElementKind::IntermediateCatchEvent { .. } => "intermediate_catch_event",
      ElementKind::IntermediateThrowEvent { .. } => "intermediate_throw_event",
      ElementKind::Gateway { .. } => "gateway",
      ElementKind::Task { kind, .. } => kind.as_str(),
      ElementKind::SequenceFlow { .. } => "sequence_flow",
      ElementKind::MessageFlow { .. } => "message_flow",
    }
  }
}
