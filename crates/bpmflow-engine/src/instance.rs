//! The public process-instance handle.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bpmflow_definition::{DefinitionDocument, Element, ElementKind, ElementGraph};
use bpmflow_state::{
  Constants, Lookup, ProcessSnapshot, ProcessState, SharedState, StateLogLevel, StepRecord, StepStatus,
};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::completion::CompletionLatch;
use crate::config::EngineConfig;
use crate::error::{EngineError, Fault, FaultKind};
use crate::hooks::{Lifecycle, Predicate, ProcessHooks, StepEvent};
use crate::timer::TimerScheduler;
use crate::variables::ReadOnlyVariables;

pub(crate) struct Inner {
  pub(crate) graph: Arc<ElementGraph>,
  pub(crate) hooks: ProcessHooks,
  pub(crate) config: EngineConfig,
  pub(crate) state: SharedState,
  pub(crate) timers: TimerScheduler,
  pub(crate) completion: CompletionLatch,
  pub(crate) disposed: AtomicBool,
}

/// One running process instance. Cloning yields another handle to the same instance.
///
/// # Usage
///
/// ```ignore
/// let graph = ElementGraph::from_json(&definition_json)?;
/// let hooks = ProcessHooks::new().task_handler(TaskKind::Service, |_ctx, vars| {
///   vars.set("charged", true);
///   Ok(())
/// });
/// let instance = ProcessInstance::new(graph, hooks, EngineConfig::default())?;
///
/// instance.begin_process(payload)?;
/// instance.wait_for_completion(Some(Duration::from_secs(30)));
/// ```
#[derive(Clone)]
pub struct ProcessInstance {
  pub(crate) inner: Arc<Inner>,
}

impl ProcessInstance {
  pub fn new(
    graph: impl Into<Arc<ElementGraph>>,
    hooks: ProcessHooks,
    config: EngineConfig,
  ) -> Result<Self, EngineError> {
    hooks.check_task_handlers()?;
    let graph = graph.into();
    let timers = TimerScheduler::new().map_err(|e| EngineError::TimerRuntime {
      message: e.to_string(),
    })?;
    let constants = Constants::new(config.constants.clone(), graph.constants().clone());
    let state = ProcessState::new(
      Uuid::new_v4().to_string(),
      constants,
      config.state_log_level,
    );

    Ok(Self {
      inner: Arc::new(Inner {
        graph,
        hooks,
        config,
        state: SharedState::new(state),
        timers,
        completion: CompletionLatch::default(),
        disposed: AtomicBool::new(false),
      }),
    })
  }

  /// Validate a definition document and create an instance for it.
  pub fn from_document(
    doc: DefinitionDocument,
    hooks: ProcessHooks,
    config: EngineConfig,
  ) -> Result<Self, EngineError> {
    let graph = ElementGraph::build(doc)?;
    Self::new(graph, hooks, config)
  }

  pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  pub fn instance_id(&self) -> String {
    self.inner.state.read(|s| s.instance_id().to_string())
  }

  pub fn graph(&self) -> &ElementGraph {
    &self.inner.graph
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  /// Start the first process whose start-validity predicate accepts and that
  /// has at least one valid start event.
  ///
  /// `variables` are stored under each started start event's scope. Returns
  /// `false` when no process could start.
  #[instrument(name = "process_begin", skip(self, variables))]
  pub fn begin_process(&self, variables: BTreeMap<String, Value>) -> Result<bool, EngineError> {
    self.ensure_live()?;
    if self.inner.state.read(|s| !s.path().is_empty()) {
      return Err(EngineError::AlreadyStarted);
    }

    let graph = Arc::clone(&self.inner.graph);
    for process in graph.processes() {
      let payload = ReadOnlyVariables::from_values(Some(&process.id), variables.clone());
      if !self.predicate_accepts(self.inner.hooks.process_start_predicate(), process, None, &payload) {
        info!(process_id = %process.id, "process_start_rejected");
        continue;
      }

      let starts: Vec<&Element> = graph
        .start_events(&process.id)
        .into_iter()
        .filter(|start| {
          let payload = ReadOnlyVariables::from_values(Some(&start.id), variables.clone());
          self.predicate_accepts(self.inner.hooks.event_start_predicate(), start, None, &payload)
        })
        .collect();
      if starts.is_empty() {
        info!(process_id = %process.id, "process_has_no_valid_start_event");
        continue;
      }

      let _step = self.inner.state.enter();
      let started = self.inner.state.write(|s| {
        if !s.path().is_empty() {
          return false;
        }
        s.path_mut().record(None, &process.id, StepStatus::Started);
        for start in &starts {
          for (name, value) in &variables {
            s.variables_mut().set(&start.id, name, value.clone());
          }
        }
        true
      });
      if !started {
        return Err(EngineError::AlreadyStarted);
      }

      info!(
        instance_id = %self.instance_id(),
        process_id = %process.id,
        start_events = starts.len(),
        "process_started"
      );
      self.log(StateLogLevel::Info, format!("process '{}' started", process.id));
      self.emit(Lifecycle::ProcessStarted, process, None, None);

      let mut next = Vec::new();
      for start in starts {
        self.record(StepRecord::new(None, &start.id, StepStatus::Started));
        self.emit(Lifecycle::EventStarted, start, None, None);
        next.extend(self.complete_event(None, start));
      }
      self.run(next);
      return Ok(true);
    }

    warn!(definition_id = %graph.definition_id(), "no_process_could_start");
    Ok(false)
  }

  /// Complete an active asynchronous task with the variables it produced.
  #[instrument(name = "task_complete", skip(self, variables))]
  pub fn complete_task(
    &self,
    task_id: &str,
    variables: BTreeMap<String, Value>,
    completed_by: Option<&str>,
  ) -> Result<(), EngineError> {
    self.ensure_live()?;
    let graph = Arc::clone(&self.inner.graph);
    let task = self.live_task(&graph, task_id)?;

    let _step = self.inner.state.enter();
    let next = self
      .finish_task(task, variables, completed_by)
      .ok_or_else(|| EngineError::TaskNotActive {
        task_id: task_id.to_string(),
      })?;
    self.run(next);
    Ok(())
  }

  /// Fail an active asynchronous task and route the fault.
  #[instrument(name = "task_error", skip(self, fault))]
  pub fn error_task(&self, task_id: &str, fault: Fault) -> Result<(), EngineError> {
    self.ensure_live()?;
    let graph = Arc::clone(&self.inner.graph);
    let task = self.live_task(&graph, task_id)?;

    let _step = self.inner.state.enter();
    let next = self
      .fail_task(task, fault.with_kind(FaultKind::TaskExecution))
      .ok_or_else(|| EngineError::TaskNotActive {
        task_id: task_id.to_string(),
      })?;
    self.run(next);
    Ok(())
  }

  /// Block until the top-level process completes. `None` waits forever.
  pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
    self.inner.completion.wait(timeout)
  }

  pub fn is_completed(&self) -> bool {
    self.inner.completion.is_set()
  }

  /// Resolve a variable from `scope` outwards. Without a scope the latest
  /// write wins, then constants.
  pub fn get(&self, scope: Option<&str>, name: &str) -> Lookup {
    let scopes = self.scope_chain(scope);
    let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
    self.inner.state.read(|s| s.get(&scopes, name))
  }

  /// Every variable name visible from `scope`, sorted.
  pub fn keys(&self, _scope: Option<&str>) -> Vec<String> {
    // Any stored name is reachable through the latest-write stage, so every
    // scope sees the same names.
    self.inner.state.read(|s| s.keys())
  }

  /// Read-only view of the variables visible from an element.
  pub fn variables(&self, scope: Option<&str>) -> ReadOnlyVariables {
    let scopes = self.scope_chain(scope);
    let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
    self
      .inner
      .state
      .read(|s| ReadOnlyVariables::capture(s, &scopes))
  }

  pub fn steps(&self) -> Vec<StepRecord> {
    self.inner.state.read(|s| s.path().steps().to_vec())
  }

  /// Elements currently started or waiting on a timer.
  pub fn current_position(&self) -> Vec<String> {
    self.inner.state.read(|s| s.path().current_position())
  }

  pub fn status_of(&self, element_id: &str) -> Option<StepStatus> {
    self.inner.state.read(|s| s.path().status_of(element_id))
  }

  pub fn export_state(&self) -> ProcessSnapshot {
    self.inner.state.read(|s| s.export())
  }

  /// Stop every pending timer wait. Timer records stay in the state so an
  /// exported snapshot can resume them in another instance.
  pub fn dispose(&self) {
    if self.inner.disposed.swap(true, Ordering::SeqCst) {
      return;
    }
    self.inner.timers.shutdown();
    info!(instance_id = %self.instance_id(), "instance_disposed");
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::SeqCst)
  }

  pub(crate) fn ensure_live(&self) -> Result<(), EngineError> {
    if self.is_disposed() {
      return Err(EngineError::InstanceDisposed);
    }
    Ok(())
  }

  fn live_task<'g>(&self, graph: &'g ElementGraph, task_id: &str) -> Result<&'g Element, EngineError> {
    let task = graph
      .element(task_id)
      .filter(|e| e.is_task())
      .ok_or_else(|| EngineError::TaskNotFound {
        task_id: task_id.to_string(),
      })?;
    if !self.inner.state.read(|s| s.path().is_active(task_id)) {
      return Err(EngineError::TaskNotActive {
        task_id: task_id.to_string(),
      });
    }
    Ok(task)
  }

  /// `scope` followed by its enclosing containers, innermost first.
  pub(crate) fn scope_chain(&self, scope: Option<&str>) -> Vec<String> {
    let Some(scope) = scope else {
      return Vec::new();
    };
    std::iter::once(scope.to_string())
      .chain(
        self
          .inner
          .graph
          .ancestors(scope)
          .into_iter()
          .map(|e| e.id.clone()),
      )
      .collect()
  }

  pub(crate) fn view_of(&self, element: &Element) -> ReadOnlyVariables {
    self.variables(Some(&element.id))
  }

  pub(crate) fn record(&self, record: StepRecord) {
    self.inner.state.write(|s| s.path_mut().push(record));
  }

  /// Invoke a lifecycle hook if one is configured. Panics are contained.
  pub(crate) fn emit(&self, hook: Lifecycle, element: &Element, source_id: Option<&str>, fault: Option<&Fault>) {
    let Some(f) = self.inner.hooks.lifecycle(hook) else {
      return;
    };
    let variables = self.view_of(element);
    let event = StepEvent {
      instance: self,
      element,
      source_id,
      variables: &variables,
      fault,
    };
    if catch_unwind(AssertUnwindSafe(|| f(&event))).is_err() {
      warn!(element_id = %element.id, hook = ?hook, "hook_panicked");
    }
  }

  /// Evaluate a predicate. A missing predicate accepts.
  pub(crate) fn evaluate(
    &self,
    predicate: Option<&Predicate>,
    element: &Element,
    source_id: Option<&str>,
    variables: &ReadOnlyVariables,
    kind: FaultKind,
  ) -> Result<bool, Fault> {
    let Some(predicate) = predicate else {
      return Ok(true);
    };
    let event = StepEvent {
      instance: self,
      element,
      source_id,
      variables,
      fault: None,
    };
    match catch_unwind(AssertUnwindSafe(|| predicate(&event))) {
      Ok(result) => result.map_err(|fault| fault.with_kind(kind)),
      Err(payload) => Err(Fault::from_panic(kind, payload)),
    }
  }

  /// Start-validity check where an error counts as rejection.
  fn predicate_accepts(
    &self,
    predicate: Option<&Predicate>,
    element: &Element,
    source_id: Option<&str>,
    variables: &ReadOnlyVariables,
  ) -> bool {
    match self.evaluate(predicate, element, source_id, variables, FaultKind::EventValidation) {
      Ok(valid) => valid,
      Err(fault) => {
        warn!(element_id = %element.id, error = %fault, "start_predicate_failed");
        false
      }
    }
  }

  /// Append to the state log and forward to the host log hook.
  pub(crate) fn log(&self, level: StateLogLevel, message: impl Into<String>) {
    let message = message.into();
    self
      .inner
      .state
      .write(|s| s.log_mut().push(level, message.as_str()));
    if let Some(hook) = self.inner.hooks.log_hook() {
      let _ = catch_unwind(AssertUnwindSafe(|| hook(level, &message)));
    }
  }

  pub(crate) fn notify_state_change(&self) {
    let Some(hook) = self.inner.hooks.state_change() else {
      return;
    };
    let snapshot = self.export_state();
    if catch_unwind(AssertUnwindSafe(|| hook(&snapshot))).is_err() {
      warn!("state_change_hook_panicked");
    }
  }

  pub(crate) fn mark_completed(&self, process: &Element) {
    let completed = self.inner.state.write(|s| {
      if s.path().has_status(&process.id, StepStatus::Succeeded) {
        return false;
      }
      s.path_mut().record(None, &process.id, StepStatus::Succeeded);
      true
    });
    if !completed {
      return;
    }

    info!(
      instance_id = %self.instance_id(),
      process_id = %process.id,
      "process_completed"
    );
    self.log(StateLogLevel::Info, format!("process '{}' completed", process.id));
    self.emit(Lifecycle::ProcessCompleted, process, None, None);
    self.inner.completion.set();
  }

  /// Set the completion latch when the restored path already finished a process.
  pub(crate) fn sync_completion(&self) {
    let graph = &self.inner.graph;
    let completed = self.inner.state.read(|s| {
      graph
        .processes()
        .any(|p| s.path().has_status(&p.id, StepStatus::Succeeded))
    });
    if completed {
      self.inner.completion.set();
    }
  }
}

/// The owning process of an element, resolving message flows and processes too.
pub(crate) fn owning_process<'g>(graph: &'g ElementGraph, element: &'g Element) -> &'g Element {
  if matches!(element.kind, ElementKind::Process) {
    return element;
  }
  graph.process_of(&element.id).unwrap_or(element)
}
