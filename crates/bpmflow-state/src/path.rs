//! Execution history of one process instance.
//!
//! The path is append-only: a step transition is never rewritten, so the latest
//! record for an element is its current status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Started,
  Succeeded,
  Failed,
  /// Waiting on a timer.
  Suspended,
}

/// One transition of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_id: Option<String>,
  pub element_id: String,
  pub status: StepStatus,
  pub timestamp: DateTime<Utc>,
  /// Flows a gateway resolved to.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outgoing: Vec<String>,
  /// Who completed a user or manual task.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_by: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepRecord {
  pub fn new(source_id: Option<&str>, element_id: &str, status: StepStatus) -> Self {
    Self {
      source_id: source_id.map(str::to_string),
      element_id: element_id.to_string(),
      status,
      timestamp: Utc::now(),
      outgoing: Vec::new(),
      completed_by: None,
      error: None,
    }
  }

  pub fn with_outgoing(mut self, outgoing: Vec<String>) -> Self {
    self.outgoing = outgoing;
    self
  }

  pub fn with_completed_by(mut self, completed_by: Option<String>) -> Self {
    self.completed_by = completed_by;
    self
  }

  pub fn with_error(mut self, error: impl Into<String>) -> Self {
    self.error = Some(error.into());
    self
  }
}

/// A timer armed on an intermediate event, due at an absolute time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTimer {
  pub element_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_id: Option<String>,
  pub wake_at: DateTime<Utc>,
}

/// A step that was reached while the instance was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_id: Option<String>,
  pub target_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionPath {
  steps: Vec<StepRecord>,
  timers: Vec<PendingTimer>,
  continuations: Vec<Continuation>,
  /// Parallel join gateway id -> incoming flows that have arrived.
  join_arrivals: BTreeMap<String, Vec<String>>,
}

impl ExecutionPath {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn from_parts(
    steps: Vec<StepRecord>,
    timers: Vec<PendingTimer>,
    continuations: Vec<Continuation>,
    join_arrivals: BTreeMap<String, Vec<String>>,
  ) -> Self {
    Self {
      steps,
      timers,
      continuations,
      join_arrivals,
    }
  }

  pub fn push(&mut self, record: StepRecord) {
    self.steps.push(record);
  }

  pub fn record(&mut self, source_id: Option<&str>, element_id: &str, status: StepStatus) {
    self.push(StepRecord::new(source_id, element_id, status));
  }

  pub fn steps(&self) -> &[StepRecord] {
    &self.steps
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Latest status recorded for an element.
  pub fn status_of(&self, element_id: &str) -> Option<StepStatus> {
    self
      .steps
      .iter()
      .rev()
      .find(|r| r.element_id == element_id)
      .map(|r| r.status)
  }

  /// An element is active while its latest status is `Started`.
  pub fn is_active(&self, element_id: &str) -> bool {
    self.status_of(element_id) == Some(StepStatus::Started)
  }

  pub fn has_status(&self, element_id: &str, status: StepStatus) -> bool {
    self
      .steps
      .iter()
      .any(|r| r.element_id == element_id && r.status == status)
  }

  /// Source of the latest record for an element.
  pub fn last_source_of(&self, element_id: &str) -> Option<&str> {
    self
      .steps
      .iter()
      .rev()
      .find(|r| r.element_id == element_id)
      .and_then(|r| r.source_id.as_deref())
  }

  /// Elements whose latest status is `Started` or `Suspended`, in first-seen order.
  pub fn current_position(&self) -> Vec<String> {
    let mut latest: Vec<(&str, StepStatus)> = Vec::new();
    for record in &self.steps {
      match latest.iter_mut().find(|(id, _)| *id == record.element_id) {
        Some(entry) => entry.1 = record.status,
        None => latest.push((&record.element_id, record.status)),
      }
    }
    latest
      .into_iter()
      .filter(|(_, status)| matches!(status, StepStatus::Started | StepStatus::Suspended))
      .map(|(id, _)| id.to_string())
      .collect()
  }

  /// Arm a timer. An existing timer for the same element is replaced.
  pub fn add_timer(&mut self, timer: PendingTimer) {
    self.timers.retain(|t| t.element_id != timer.element_id);
    self.timers.push(timer);
  }

  /// Remove and return the pending timer for an element.
  pub fn take_timer(&mut self, element_id: &str) -> Option<PendingTimer> {
    let index = self
      .timers
      .iter()
      .position(|t| t.element_id == element_id)?;
    Some(self.timers.remove(index))
  }

  pub fn timers(&self) -> &[PendingTimer] {
    &self.timers
  }

  pub fn push_continuation(&mut self, source_id: Option<&str>, target_id: &str) {
    self.continuations.push(Continuation {
      source_id: source_id.map(str::to_string),
      target_id: target_id.to_string(),
    });
  }

  pub fn continuations(&self) -> &[Continuation] {
    &self.continuations
  }

  /// Remove every continuation, oldest first.
  pub fn drain_continuations(&mut self) -> Vec<Continuation> {
    std::mem::take(&mut self.continuations)
  }

  /// Record a flow arriving at a join. Returns how many distinct flows have arrived.
  pub fn record_arrival(&mut self, gateway_id: &str, flow_id: &str) -> usize {
    let arrivals = self
      .join_arrivals
      .entry(gateway_id.to_string())
      .or_default();
    if !arrivals.iter().any(|f| f == flow_id) {
      arrivals.push(flow_id.to_string());
    }
    arrivals.len()
  }

  /// Consume the arrivals of a join once it fires.
  pub fn take_arrivals(&mut self, gateway_id: &str) -> Vec<String> {
    self.join_arrivals.remove(gateway_id).unwrap_or_default()
  }

  pub fn join_arrivals(&self) -> &BTreeMap<String, Vec<String>> {
    &self.join_arrivals
  }
}
