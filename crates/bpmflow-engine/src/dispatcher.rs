//! Step execution.
//!
//! `run` drains a stack of `(source, target)` steps. Each step applies the
//! target's transition and pushes whatever comes next; branches run depth
//! first in declaration order. While the instance is suspended a step is
//! recorded as a continuation instead of running.
//!
//! Host code (hooks, predicates, task handlers) is always called with the
//! state lock released; results are applied under the lock.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bpmflow_definition::{Element, ElementKind, GatewayKind, TaskKind, TimerDef};
use bpmflow_state::{StateLogLevel, StepRecord, StepStatus};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Fault, FaultKind};
use crate::hooks::{Lifecycle, TaskHandler};
use crate::instance::ProcessInstance;
use crate::suspension::wake_time_after;
use crate::task::{TaskContext, TaskHandle};
use crate::variables::Variables;

/// A step to run: entering `target` from `source`.
pub(crate) type Next = (Option<String>, String);

impl ProcessInstance {
  pub(crate) fn advance(&self, source_id: Option<&str>, target_id: &str) {
    self.run(vec![(source_id.map(str::to_string), target_id.to_string())]);
  }

  pub(crate) fn run(&self, next: Vec<Next>) {
    if next.is_empty() {
      return;
    }
    let _step = self.inner.state.enter();
    let graph = Arc::clone(&self.inner.graph);

    let mut stack: Vec<Next> = next.into_iter().rev().collect();
    while let Some((source_id, target_id)) = stack.pop() {
      if self.is_disposed() {
        debug!(target_id = %target_id, "step_dropped_after_dispose");
        continue;
      }
      let source = source_id.as_deref();
      if self
        .inner
        .state
        .write(|s| s.defer_if_suspended(source, &target_id))
      {
        continue;
      }

      let Some(element) = graph.element(&target_id) else {
        error!(target_id = %target_id, "step_target_unknown");
        continue;
      };

      let following = match &element.kind {
        ElementKind::SequenceFlow { .. } | ElementKind::MessageFlow { .. } => {
          self.step_flow(source, element)
        }
        ElementKind::Gateway { kind, default_flow } => {
          self.step_gateway(source, element, *kind, default_flow.as_deref())
        }
        ElementKind::StartEvent
        | ElementKind::EndEvent
        | ElementKind::IntermediateCatchEvent { .. }
        | ElementKind::IntermediateThrowEvent { .. } => self.step_event(source, element),
        ElementKind::Task { kind, .. } => self.step_task(source, element, *kind),
        ElementKind::SubProcess => self.step_sub_process(source, element),
        ElementKind::Process => {
          warn!(target_id = %target_id, "process_is_not_a_step_target");
          Vec::new()
        }
      };

      stack.extend(following.into_iter().rev());
      self.notify_state_change();
    }
  }

  /// Outgoing flows of an element as next steps.
  fn outgoing_steps(&self, element: &Element) -> Vec<Next> {
    self
      .inner
      .graph
      .outgoing(&element.id)
      .iter()
      .map(|flow| (Some(element.id.clone()), flow.clone()))
      .collect()
  }

  fn step_flow(&self, source: Option<&str>, flow: &Element) -> Vec<Next> {
    self.inner.state.write(|s| {
      s.path_mut().record(source, &flow.id, StepStatus::Started);
      s.path_mut().record(source, &flow.id, StepStatus::Succeeded);
    });

    let hook = match flow.kind {
      ElementKind::MessageFlow { .. } => Lifecycle::MessageFlowCompleted,
      _ => Lifecycle::SequenceFlowCompleted,
    };
    self.emit(hook, flow, source, None);

    let Some((_, target)) = flow.flow_endpoints() else {
      return Vec::new();
    };
    if matches!(flow.kind, ElementKind::MessageFlow { .. }) {
      self.enter_receiving_process(flow, target);
    }
    vec![(Some(flow.id.clone()), target.to_string())]
  }

  /// A message reaching a process that has not started starts it.
  fn enter_receiving_process(&self, flow: &Element, target: &str) {
    let graph = Arc::clone(&self.inner.graph);
    let Some(process) = graph.process_of(target) else {
      return;
    };
    let entered = self.inner.state.write(|s| {
      if s.path().status_of(&process.id).is_some() {
        return false;
      }
      s.path_mut()
        .record(Some(&flow.id), &process.id, StepStatus::Started);
      true
    });
    if entered {
      info!(process_id = %process.id, message_flow_id = %flow.id, "process_started_by_message");
      self.emit(Lifecycle::ProcessStarted, process, Some(&flow.id), None);
    }
  }

  fn step_gateway(
    &self,
    source: Option<&str>,
    gateway: &Element,
    kind: GatewayKind,
    default_flow: Option<&str>,
  ) -> Vec<Next> {
    let graph = Arc::clone(&self.inner.graph);
    let incoming = graph.incoming(&gateway.id).len();

    if kind == GatewayKind::Parallel && incoming > 1 {
      let arrived = self.inner.state.write(|s| {
        let arrived = s
          .path_mut()
          .record_arrival(&gateway.id, source.unwrap_or_default());
        if arrived >= incoming {
          s.path_mut().take_arrivals(&gateway.id);
        }
        arrived
      });
      if arrived < incoming {
        debug!(gateway_id = %gateway.id, arrived, incoming, "join_waiting");
        return Vec::new();
      }
    }

    self.record(StepRecord::new(source, &gateway.id, StepStatus::Started));
    self.emit(Lifecycle::GatewayStarted, gateway, source, None);

    match self.select_flows(gateway, kind, default_flow) {
      Ok(selected) => {
        if selected.is_empty() {
          warn!(gateway_id = %gateway.id, "gateway_selected_no_flow");
        }
        self.record(
          StepRecord::new(source, &gateway.id, StepStatus::Succeeded).with_outgoing(selected.clone()),
        );
        info!(gateway_id = %gateway.id, outgoing = ?selected, "gateway_completed");
        self.emit(Lifecycle::GatewayCompleted, gateway, source, None);
        selected
          .into_iter()
          .map(|flow| (Some(gateway.id.clone()), flow))
          .collect()
      }
      Err(fault) => {
        error!(gateway_id = %gateway.id, error = %fault, "gateway_failed");
        self.log(
          StateLogLevel::Error,
          format!("gateway '{}' failed: {fault}", gateway.id),
        );
        self.record(StepRecord::new(source, &gateway.id, StepStatus::Failed).with_error(fault.to_string()));
        self.emit(Lifecycle::GatewayError, gateway, source, Some(&fault));
        self.route_fault(gateway, &fault)
      }
    }
  }

  /// Resolve the outgoing flows a gateway takes. The default flow is never
  /// offered to the predicate; it is only taken when nothing else is.
  fn select_flows(
    &self,
    gateway: &Element,
    kind: GatewayKind,
    default_flow: Option<&str>,
  ) -> Result<Vec<String>, Fault> {
    let graph = Arc::clone(&self.inner.graph);
    let outgoing = graph.outgoing(&gateway.id);

    if kind == GatewayKind::Parallel {
      return Ok(outgoing.to_vec());
    }

    let view = self.view_of(gateway);
    let mut selected = Vec::new();
    for flow_id in outgoing {
      if Some(flow_id.as_str()) == default_flow {
        continue;
      }
      let Some(flow) = graph.element(flow_id) else {
        continue;
      };
      let accepted = self.evaluate(
        self.inner.hooks.flow_predicate(),
        flow,
        Some(&gateway.id),
        &view,
        FaultKind::GatewayEvaluation,
      )?;
      if accepted {
        selected.push(flow_id.clone());
        if kind == GatewayKind::Exclusive {
          break;
        }
      }
    }

    if selected.is_empty()
      && let Some(default_flow) = default_flow
    {
      selected.push(default_flow.to_string());
    }
    Ok(selected)
  }

  fn step_event(&self, source: Option<&str>, event: &Element) -> Vec<Next> {
    let graph = Arc::clone(&self.inner.graph);

    // A catch event reached by fault routing may sit in a sub-process that never started.
    if matches!(event.kind, ElementKind::IntermediateCatchEvent { .. })
      && let Some(sub_process) = graph.owning_sub_process(&event.id)
    {
      let entered = self.inner.state.write(|s| {
        if s.path().status_of(&sub_process.id).is_some() {
          return false;
        }
        s.path_mut().record(source, &sub_process.id, StepStatus::Started);
        true
      });
      if entered {
        self.emit(Lifecycle::SubProcessStarted, sub_process, source, None);
      }
    }

    self.record(StepRecord::new(source, &event.id, StepStatus::Started));
    self.emit(Lifecycle::EventStarted, event, source, None);

    if let Some(timer) = event.timer() {
      let wake_at = self
        .timer_delay_ms(event, timer)
        .and_then(|delay_ms| wake_time_after(&event.id, delay_ms));
      return match wake_at {
        Ok(wake_at) => {
          self.arm_timer(source, event, wake_at);
          Vec::new()
        }
        Err(fault) => self.fail_event(source, event, fault),
      };
    }

    if matches!(
      event.kind,
      ElementKind::StartEvent | ElementKind::IntermediateCatchEvent { .. }
    ) {
      let view = self.view_of(event);
      let verdict = self.evaluate(
        self.inner.hooks.event_start_predicate(),
        event,
        source,
        &view,
        FaultKind::EventValidation,
      );
      match verdict {
        Ok(true) => {}
        Ok(false) => {
          let fault = Fault::event(
            "EventValidation",
            format!("event '{}' rejected by start-validity predicate", event.id),
          );
          return self.fail_event(source, event, fault);
        }
        Err(fault) => return self.fail_event(source, event, fault),
      }
    }

    self.complete_event(source, event)
  }

  fn timer_delay_ms(&self, event: &Element, timer: &TimerDef) -> Result<u64, Fault> {
    match timer {
      TimerDef::Duration { ms } => Ok(*ms),
      TimerDef::Variable { name } => {
        let view = self.view_of(event);
        let value = view.get(name);
        value
          .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
          .ok_or_else(|| {
            Fault::event(
              "InvalidTimer",
              format!("timer variable '{name}' is not a non-negative number of milliseconds"),
            )
          })
      }
    }
  }

  /// Mark an event `Succeeded` and resolve what follows it. An end event
  /// completes its sub-process, or the top-level process.
  pub(crate) fn complete_event(&self, source: Option<&str>, event: &Element) -> Vec<Next> {
    self.record(StepRecord::new(source, &event.id, StepStatus::Succeeded));
    debug!(element_id = %event.id, "event_completed");
    self.emit(Lifecycle::EventCompleted, event, source, None);

    if !matches!(event.kind, ElementKind::EndEvent) {
      return self.outgoing_steps(event);
    }

    let graph = Arc::clone(&self.inner.graph);
    match graph.owning_sub_process(&event.id) {
      Some(sub_process) => {
        let completed = self.inner.state.write(|s| {
          if !s.path().is_active(&sub_process.id) {
            return false;
          }
          let sub_source = s.path().last_source_of(&sub_process.id).map(str::to_string);
          s.path_mut()
            .record(sub_source.as_deref(), &sub_process.id, StepStatus::Succeeded);
          true
        });
        if !completed {
          return Vec::new();
        }
        info!(sub_process_id = %sub_process.id, "sub_process_completed");
        self.emit(Lifecycle::SubProcessCompleted, sub_process, Some(&event.id), None);
        self.outgoing_steps(sub_process)
      }
      None => {
        if let Some(process) = graph.process_of(&event.id) {
          self.mark_completed(process);
        }
        Vec::new()
      }
    }
  }

  fn fail_event(&self, source: Option<&str>, event: &Element, fault: Fault) -> Vec<Next> {
    warn!(element_id = %event.id, error = %fault, "event_failed");
    self.log(
      StateLogLevel::Warn,
      format!("event '{}' failed: {fault}", event.id),
    );
    self.record(StepRecord::new(source, &event.id, StepStatus::Failed).with_error(fault.to_string()));
    self.emit(Lifecycle::EventError, event, source, Some(&fault));
    self.route_fault(event, &fault)
  }

  fn step_task(&self, source: Option<&str>, task: &Element, kind: TaskKind) -> Vec<Next> {
    self.record(StepRecord::new(source, &task.id, StepStatus::Started));
    info!(task_id = %task.id, kind = kind.as_str(), "task_started");
    self.emit(Lifecycle::TaskStarted, task, source, None);

    let ctx = TaskContext {
      instance: self,
      element: task,
    };
    let variables = Variables::new(self.view_of(task));

    // Handlers were checked against their kind at construction.
    let handler = self.inner.hooks.handler_for(kind);
    let result: Result<Option<BTreeMap<String, Value>>, Fault> = if kind.is_asynchronous() {
      match handler {
        Some(TaskHandler::Async(handler)) => {
          let handle = TaskHandle::new(&self.inner, &task.id);
          match catch_unwind(AssertUnwindSafe(|| handler(&ctx, variables, handle))) {
            Ok(()) => Ok(None),
            Err(payload) => Err(Fault::from_panic(FaultKind::TaskExecution, payload)),
          }
        }
        _ => Ok(Some(BTreeMap::new())),
      }
    } else {
      match handler {
        Some(TaskHandler::Sync(handler)) => {
          let mut variables = variables;
          match catch_unwind(AssertUnwindSafe(|| handler(&ctx, &mut variables))) {
            Ok(Ok(())) => Ok(Some(variables.into_changes())),
            Ok(Err(fault)) => Err(fault.with_kind(FaultKind::TaskExecution)),
            Err(payload) => Err(Fault::from_panic(FaultKind::TaskExecution, payload)),
          }
        }
        _ => Ok(Some(BTreeMap::new())),
      }
    };

    match result {
      Ok(Some(changes)) => self.finish_task(task, changes, None).unwrap_or_default(),
      Ok(None) => {
        debug!(task_id = %task.id, "task_waiting_for_completion");
        Vec::new()
      }
      Err(fault) => self.fail_task(task, fault).unwrap_or_default(),
    }
  }

  /// Merge a task's variables and mark it `Succeeded`. `None` when the task was
  /// not active, in which case nothing changed.
  pub(crate) fn finish_task(
    &self,
    task: &Element,
    changes: BTreeMap<String, Value>,
    completed_by: Option<&str>,
  ) -> Option<Vec<Next>> {
    let scopes = self.scope_chain(Some(&task.id));
    let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
    let outcome = self
      .inner
      .state
      .write(|s| s.merge(&task.id, &scopes, &changes, completed_by));
    if !outcome.completed {
      debug!(task_id = %task.id, "task_not_active");
      return None;
    }

    info!(
      task_id = %task.id,
      written = ?outcome.written,
      completed_by = completed_by.unwrap_or_default(),
      "task_completed"
    );
    self.log(StateLogLevel::Debug, format!("task '{}' completed", task.id));
    self.emit(Lifecycle::TaskCompleted, task, None, None);
    Some(self.outgoing_steps(task))
  }

  /// Mark an active task `Failed` and route the fault. `None` when the task was not active.
  pub(crate) fn fail_task(&self, task: &Element, fault: Fault) -> Option<Vec<Next>> {
    let recorded = self.inner.state.write(|s| {
      if !s.path().is_active(&task.id) {
        return false;
      }
      let source = s.path().last_source_of(&task.id).map(str::to_string);
      s.path_mut().push(
        StepRecord::new(source.as_deref(), &task.id, StepStatus::Failed).with_error(fault.to_string()),
      );
      true
    });
    if !recorded {
      return None;
    }

    error!(task_id = %task.id, error = %fault, "task_failed");
    self.log(
      StateLogLevel::Error,
      format!("task '{}' failed: {fault}", task.id),
    );
    self.emit(Lifecycle::TaskError, task, None, Some(&fault));
    Some(self.route_fault(task, &fault))
  }

  fn step_sub_process(&self, source: Option<&str>, sub_process: &Element) -> Vec<Next> {
    let view = self.view_of(sub_process);
    let verdict = self.evaluate(
      self.inner.hooks.process_start_predicate(),
      sub_process,
      source,
      &view,
      FaultKind::EventValidation,
    );

    self.record(StepRecord::new(source, &sub_process.id, StepStatus::Started));

    let fault = match verdict {
      Ok(true) => None,
      Ok(false) => Some(Fault::event(
        "SubProcessStartInvalid",
        format!("sub-process '{}' rejected by start-validity predicate", sub_process.id),
      )),
      Err(fault) => Some(fault),
    };
    if let Some(fault) = fault {
      warn!(sub_process_id = %sub_process.id, error = %fault, "sub_process_failed");
      self.record(
        StepRecord::new(source, &sub_process.id, StepStatus::Failed).with_error(fault.to_string()),
      );
      self.emit(Lifecycle::SubProcessError, sub_process, source, Some(&fault));
      return self.route_fault(sub_process, &fault);
    }

    info!(sub_process_id = %sub_process.id, "sub_process_started");
    self.emit(Lifecycle::SubProcessStarted, sub_process, source, None);
    self
      .inner
      .graph
      .start_events(&sub_process.id)
      .into_iter()
      .map(|start| (Some(sub_process.id.clone()), start.id.clone()))
      .collect()
  }
}
