//! Engine errors and runtime faults.

use std::any::Any;

use bpmflow_definition::DefinitionErrors;
use bpmflow_state::StateError;

/// Errors returned to the caller of an instance operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// `resume()` without a prior `suspend()`.
  #[error("process instance is not suspended")]
  NotSuspended,

  #[error("process instance is already suspended")]
  AlreadySuspended,

  /// `begin_process()` on an instance that already has a history.
  #[error("process instance has already started")]
  AlreadyStarted,

  #[error("task '{task_id}' not found in definition")]
  TaskNotFound { task_id: String },

  /// The task exists but is not waiting for completion.
  #[error("task '{task_id}' is not active")]
  TaskNotActive { task_id: String },

  #[error("process instance has been disposed")]
  InstanceDisposed,

  /// A synchronous handler registered for a user or manual task kind, or an
  /// asynchronous handler for any other kind.
  #[error("{kind} requires a {expected} handler")]
  TaskHandlerMismatch {
    kind: &'static str,
    expected: &'static str,
  },

  /// The timer runtime could not be created.
  #[error("failed to start timer runtime: {message}")]
  TimerRuntime { message: String },

  #[error(transparent)]
  Definition(#[from] DefinitionErrors),

  #[error(transparent)]
  State(#[from] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
  /// Raised by a task handler or reported through a task handle.
  TaskExecution,
  /// Raised by a flow-validity predicate while a gateway selects branches.
  GatewayEvaluation,
  /// Raised by a start-validity predicate, or an unusable timer declaration.
  EventValidation,
}

/// A runtime step failure. Never returned to the caller of an operation; it is
/// reported through hooks and routed to catch events by `name` or `message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct Fault {
  pub kind: FaultKind,
  /// Identifying name, matched against declared catch types.
  pub name: String,
  pub message: String,
}

impl Fault {
  pub fn new(kind: FaultKind, name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      message: message.into(),
    }
  }

  pub fn task(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(FaultKind::TaskExecution, name, message)
  }

  pub fn gateway(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(FaultKind::GatewayEvaluation, name, message)
  }

  pub fn event(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(FaultKind::EventValidation, name, message)
  }

  pub fn with_kind(mut self, kind: FaultKind) -> Self {
    self.kind = kind;
    self
  }

  /// A fault for a host closure that panicked.
  pub(crate) fn from_panic(kind: FaultKind, payload: Box<dyn Any + Send>) -> Self {
    let message = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "host callback panicked".to_string());
    Self::new(kind, "Panic", message)
  }
}
