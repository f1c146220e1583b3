//! Host hooks.
//!
//! `ProcessHooks` holds at most one handler per hook. It is built once, handed
//! to [`crate::ProcessInstance::new`], and never changed afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use bpmflow_definition::{Element, TaskKind};
use bpmflow_state::{ProcessSnapshot, StateLogLevel};

use crate::error::{EngineError, Fault};
use crate::instance::ProcessInstance;
use crate::task::{TaskContext, TaskHandle};
use crate::variables::{ReadOnlyVariables, Variables};

/// Lifecycle notifications with a single handler slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
  EventStarted,
  EventCompleted,
  EventError,
  TaskStarted,
  TaskCompleted,
  TaskError,
  ProcessStarted,
  ProcessCompleted,
  SubProcessStarted,
  SubProcessCompleted,
  SubProcessError,
  GatewayStarted,
  GatewayCompleted,
  GatewayError,
  SequenceFlowCompleted,
  MessageFlowCompleted,
}

/// What a lifecycle hook or predicate is told about a step.
pub struct StepEvent<'a> {
  pub instance: &'a ProcessInstance,
  pub element: &'a Element,
  pub source_id: Option<&'a str>,
  /// Read-only view scoped to the element (to the gateway, for flow predicates).
  pub variables: &'a ReadOnlyVariables,
  pub fault: Option<&'a Fault>,
}

/// A fault no catch event handled.
pub struct ProcessErrorEvent<'a> {
  pub instance: &'a ProcessInstance,
  /// Owning top-level process of the failing element.
  pub process: &'a Element,
  pub element: &'a Element,
  pub fault: &'a Fault,
}

pub type LifecycleHook = Arc<dyn Fn(&StepEvent<'_>) + Send + Sync>;
pub type ProcessErrorHook = Arc<dyn Fn(&ProcessErrorEvent<'_>) + Send + Sync>;
/// Returning `Err` counts as rejection; for flow predicates it also fails the gateway.
pub type Predicate = Arc<dyn Fn(&StepEvent<'_>) -> Result<bool, Fault> + Send + Sync>;
pub type LogHook = Arc<dyn Fn(StateLogLevel, &str) + Send + Sync>;
pub type StateChangeHook = Arc<dyn Fn(&ProcessSnapshot) + Send + Sync>;
pub type SyncTaskHandler = Arc<dyn Fn(&TaskContext<'_>, &mut Variables) -> Result<(), Fault> + Send + Sync>;
pub type AsyncTaskHandler = Arc<dyn Fn(&TaskContext<'_>, Variables, TaskHandle) + Send + Sync>;

/// Handler for one task kind.
#[derive(Clone)]
pub enum TaskHandler {
  /// Runs to completion; its writes are merged immediately.
  Sync(SyncTaskHandler),
  /// Returns at once; the host completes the task later through its [`TaskHandle`].
  Async(AsyncTaskHandler),
}

#[derive(Clone, Default)]
pub struct ProcessHooks {
  lifecycle: HashMap<Lifecycle, LifecycleHook>,
  process_error: Option<ProcessErrorHook>,
  event_start_valid: Option<Predicate>,
  process_start_valid: Option<Predicate>,
  flow_valid: Option<Predicate>,
  task_handlers: HashMap<TaskKind, TaskHandler>,
  log: Option<LogHook>,
  state_change: Option<StateChangeHook>,
}

impl ProcessHooks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the handler for a lifecycle notification, replacing any previous one.
  pub fn on(mut self, hook: Lifecycle, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.lifecycle.insert(hook, Arc::new(f));
    self
  }

  pub fn on_event_started(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::EventStarted, f)
  }

  pub fn on_event_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::EventCompleted, f)
  }

  pub fn on_event_error(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::EventError, f)
  }

  pub fn on_task_started(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::TaskStarted, f)
  }

  pub fn on_task_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::TaskCompleted, f)
  }

  pub fn on_task_error(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::TaskError, f)
  }

  pub fn on_process_started(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::ProcessStarted, f)
  }

  pub fn on_process_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::ProcessCompleted, f)
  }

  pub fn on_sub_process_started(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::SubProcessStarted, f)
  }

  pub fn on_sub_process_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::SubProcessCompleted, f)
  }

  pub fn on_sub_process_error(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::SubProcessError, f)
  }

  pub fn on_gateway_started(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::GatewayStarted, f)
  }

  pub fn on_gateway_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::GatewayCompleted, f)
  }

  pub fn on_gateway_error(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::GatewayError, f)
  }

  pub fn on_sequence_flow_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::SequenceFlowCompleted, f)
  }

  pub fn on_message_flow_completed(self, f: impl Fn(&StepEvent<'_>) + Send + Sync + 'static) -> Self {
    self.on(Lifecycle::MessageFlowCompleted, f)
  }

  pub fn on_process_error(mut self, f: impl Fn(&ProcessErrorEvent<'_>) + Send + Sync + 'static) -> Self {
    self.process_error = Some(Arc::new(f));
    self
  }

  pub fn event_start_valid(
    mut self,
    f: impl Fn(&StepEvent<'_>) -> Result<bool, Fault> + Send + Sync + 'static,
  ) -> Self {
    self.event_start_valid = Some(Arc::new(f));
    self
  }

  /// Consulted for top-level processes and sub-processes.
  pub fn process_start_valid(
    mut self,
    f: impl Fn(&StepEvent<'_>) -> Result<bool, Fault> + Send + Sync + 'static,
  ) -> Self {
    self.process_start_valid = Some(Arc::new(f));
    self
  }

  /// Consulted for each candidate outgoing flow of an exclusive, inclusive or
  /// complex gateway. `element` is the flow.
  pub fn flow_valid(
    mut self,
    f: impl Fn(&StepEvent<'_>) -> Result<bool, Fault> + Send + Sync + 'static,
  ) -> Self {
    self.flow_valid = Some(Arc::new(f));
    self
  }

  /// Handler for a task kind that completes synchronously: every kind except
  /// [`TaskKind::User`] and [`TaskKind::Manual`].
  pub fn task_handler(
    mut self,
    kind: TaskKind,
    f: impl Fn(&TaskContext<'_>, &mut Variables) -> Result<(), Fault> + Send + Sync + 'static,
  ) -> Self {
    self.task_handlers.insert(kind, TaskHandler::Sync(Arc::new(f)));
    self
  }

  /// Handler for a task kind completed later through a [`TaskHandle`]:
  /// [`TaskKind::User`] or [`TaskKind::Manual`].
  pub fn async_task_handler(
    mut self,
    kind: TaskKind,
    f: impl Fn(&TaskContext<'_>, Variables, TaskHandle) + Send + Sync + 'static,
  ) -> Self {
    self.task_handlers.insert(kind, TaskHandler::Async(Arc::new(f)));
    self
  }

  pub fn on_log(mut self, f: impl Fn(StateLogLevel, &str) + Send + Sync + 'static) -> Self {
    self.log = Some(Arc::new(f));
    self
  }

  /// Called with a fresh snapshot after every step and after `suspend()` settles.
  pub fn on_state_change(mut self, f: impl Fn(&ProcessSnapshot) + Send + Sync + 'static) -> Self {
    self.state_change = Some(Arc::new(f));
    self
  }

  pub(crate) fn lifecycle(&self, hook: Lifecycle) -> Option<&LifecycleHook> {
    self.lifecycle.get(&hook)
  }

  pub(crate) fn process_error(&self) -> Option<&ProcessErrorHook> {
    self.process_error.as_ref()
  }

  pub(crate) fn event_start_predicate(&self) -> Option<&Predicate> {
    self.event_start_valid.as_ref()
  }

  pub(crate) fn process_start_predicate(&self) -> Option<&Predicate> {
    self.process_start_valid.as_ref()
  }

  pub(crate) fn flow_predicate(&self) -> Option<&Predicate> {
    self.flow_valid.as_ref()
  }

  /// Every handler must match the completion mode of its kind.
  pub(crate) fn check_task_handlers(&self) -> Result<(), EngineError> {
    for kind in TaskKind::ALL {
      let mismatch = match self.task_handlers.get(&kind) {
        Some(TaskHandler::Sync(_)) => kind.is_asynchronous(),
        Some(TaskHandler::Async(_)) => !kind.is_asynchronous(),
        None => false,
      };
      if mismatch {
        return Err(EngineError::TaskHandlerMismatch {
          kind: kind.as_str(),
          expected: if kind.is_asynchronous() { "asynchronous" } else { "synchronous" },
        });
      }
    }
    Ok(())
  }

  pub(crate) fn handler_for(&self, kind: TaskKind) -> Option<&TaskHandler> {
    self.task_handlers.get(&kind)
  }

  pub(crate) fn log_hook(&self) -> Option<&LogHook> {
    self.log.as_ref()
  }

  pub(crate) fn state_change(&self) -> Option<&StateChangeHook> {
    self.state_change.as_ref()
  }
}
