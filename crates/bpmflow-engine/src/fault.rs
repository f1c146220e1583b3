//! Routing of failed steps to catch points.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bpmflow_definition::{Element, WILDCARD_ERROR_TYPE};
use bpmflow_state::{StateLogLevel, StepStatus};
use tracing::{error, info, warn};

use crate::dispatcher::Next;
use crate::error::Fault;
use crate::hooks::ProcessErrorEvent;
use crate::instance::{ProcessInstance, owning_process};

impl ProcessInstance {
  /// Find where a failed element continues.
  ///
  /// A task's own catch declarations are consulted first, in declaration
  /// order. Then every intermediate catch event of the definition: an exact
  /// match on the fault's name or message, then a wildcard. Catch events that
  /// already succeeded, or that are the failing element, are skipped. With no
  /// match the process-error hook is told and the branch ends.
  pub(crate) fn route_fault(&self, failed: &Element, fault: &Fault) -> Vec<Next> {
    let names = [fault.name.as_str(), fault.message.as_str()];

    if let Some(target) = failed.catch_target(&names) {
      info!(element_id = %failed.id, target_id = %target, fault = %fault.name, "fault_caught_by_task");
      return vec![(Some(failed.id.clone()), target.to_string())];
    }

    let graph = Arc::clone(&self.inner.graph);
    // A catch event succeeds at most once, and a failing one is not routed again.
    let catch_events: Vec<_> = if failed.error_types().is_empty() {
      graph
        .catch_events()
        .into_iter()
        .filter(|event| event.id != failed.id)
        .filter(|event| {
          !self
            .inner
            .state
            .read(|s| s.path().has_status(&event.id, StepStatus::Succeeded))
        })
        .collect()
    } else {
      Vec::new()
    };
    let exact = catch_events.iter().find(|event| {
      event
        .error_types()
        .iter()
        .any(|t| t != WILDCARD_ERROR_TYPE && names.contains(&t.as_str()))
    });
    let matched = exact.or_else(|| {
      catch_events.iter().find(|event| {
        event
          .error_types()
          .iter()
          .any(|t| t == WILDCARD_ERROR_TYPE)
      })
    });

    if let Some(catch_event) = matched {
      info!(
        element_id = %failed.id,
        catch_event_id = %catch_event.id,
        fault = %fault.name,
        "fault_routed"
      );
      return vec![(Some(failed.id.clone()), catch_event.id.clone())];
    }

    let process = owning_process(&graph, failed);
    error!(
      process_id = %process.id,
      element_id = %failed.id,
      error = %fault,
      "process_error_unhandled"
    );
    self.log(
      StateLogLevel::Error,
      format!("unhandled fault in '{}': {fault}", failed.id),
    );
    if let Some(hook) = self.inner.hooks.process_error() {
      let event = ProcessErrorEvent {
        instance: self,
        process,
        element: failed,
        fault,
      };
      if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
        warn!(element_id = %failed.id, "process_error_hook_panicked");
      }
    }
    Vec::new()
  }
}
