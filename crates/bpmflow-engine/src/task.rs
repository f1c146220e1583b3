use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bpmflow_definition::{Element, TaskKind};
use serde_json::Value;

use crate::error::{EngineError, Fault};
use crate::instance::{Inner, ProcessInstance};
use crate::variables::Variables;

/// What a task handler knows about the task it runs.
pub struct TaskContext<'a> {
  pub(crate) instance: &'a ProcessInstance,
  pub(crate) element: &'a Element,
}

impl<'a> TaskContext<'a> {
  pub fn instance(&self) -> &'a ProcessInstance {
    self.instance
  }

  pub fn element(&self) -> &'a Element {
    self.element
  }

  pub fn task_id(&self) -> &'a str {
    &self.element.id
  }

  pub fn kind(&self) -> Option<TaskKind> {
    self.element.task_kind()
  }

  pub fn lane(&self) -> Option<&'a str> {
    self.element.lane()
  }

  /// A free-form property declared on the task.
  pub fn property(&self, name: &str) -> Option<&'a Value> {
    self.element.properties.get(name)
  }
}

/// Completes or fails an asynchronous task later, from any thread.
///
/// The handle does not keep the instance alive; once it is dropped every call
/// returns [`EngineError::InstanceDisposed`].
#[derive(Clone)]
pub struct TaskHandle {
  instance: Weak<Inner>,
  task_id: String,
}

impl TaskHandle {
  pub(crate) fn new(instance: &Arc<Inner>, task_id: &str) -> Self {
    Self {
      instance: Arc::downgrade(instance),
      task_id: task_id.to_string(),
    }
  }

  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  /// Merge the writes made through `variables` and continue past the task.
  pub fn complete(&self, variables: Variables, completed_by: Option<&str>) -> Result<(), EngineError> {
    self.complete_with(variables.into_changes(), completed_by)
  }

  pub fn complete_with(
    &self,
    variables: BTreeMap<String, Value>,
    completed_by: Option<&str>,
  ) -> Result<(), EngineError> {
    self
      .instance()?
      .complete_task(&self.task_id, variables, completed_by)
  }

  pub fn error(&self, fault: Fault) -> Result<(), EngineError> {
    self.instance()?.error_task(&self.task_id, fault)
  }

  fn instance(&self) -> Result<ProcessInstance, EngineError> {
    self
      .instance
      .upgrade()
      .map(ProcessInstance::from_inner)
      .ok_or(EngineError::InstanceDisposed)
  }
}
