//! Manual suspend/resume, timer arming, and snapshot loading.

use std::sync::Arc;
use std::time::Duration;

use bpmflow_definition::Element;
use bpmflow_state::{PendingTimer, ProcessSnapshot, StateLogLevel, StepRecord, StepStatus};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Fault};
use crate::instance::ProcessInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionState {
  Running,
  /// Suspend requested; a step is still in flight.
  Suspending,
  Suspended,
}

/// Absolute wake time `delay_ms` from now. Fails when it is past the range of
/// a timestamp.
pub(crate) fn wake_time_after(element_id: &str, delay_ms: u64) -> Result<DateTime<Utc>, Fault> {
  i64::try_from(delay_ms)
    .ok()
    .and_then(TimeDelta::try_milliseconds)
    .and_then(|delay| Utc::now().checked_add_signed(delay))
    .ok_or_else(|| {
      Fault::event(
        "InvalidTimer",
        format!("timer delay of {delay_ms}ms on '{element_id}' is out of range"),
      )
    })
}

impl ProcessInstance {
  /// Stop forward progress at the next step boundary.
  ///
  /// Armed timers are cancelled but stay recorded. Blocks until in-flight
  /// steps settle or the configured timeout passes; returns whether they
  /// settled. A running synchronous task handler is not interrupted.
  ///
  /// Called from inside a hook or task handler, the caller is itself an
  /// in-flight step: the wait always runs for the full `suspend_timeout_ms`
  /// and returns `false`. The instance is still suspended, and the calling
  /// step's successors become continuations.
  #[instrument(name = "process_suspend", skip(self))]
  pub fn suspend(&self) -> Result<bool, EngineError> {
    self.ensure_live()?;
    self.inner.state.write(|s| {
      if s.is_suspended() {
        return Err(EngineError::AlreadySuspended);
      }
      s.set_suspended(true);
      Ok(())
    })?;
    self.inner.timers.cancel_all();

    let settled = self
      .inner
      .state
      .wait_settled(self.inner.config.suspend_timeout());
    let (continuations, timers) = self.inner.state.read(|s| {
      (
        s.path().continuations().len(),
        s.path().timers().len(),
      )
    });

    if settled {
      info!(instance_id = %self.instance_id(), continuations, timers, "process_suspended");
    } else {
      warn!(instance_id = %self.instance_id(), continuations, timers, "process_suspend_timed_out");
    }
    self.log(StateLogLevel::Info, "process suspended");
    self.notify_state_change();
    Ok(settled)
  }

  /// Continue a suspended instance: replay recorded continuations in order,
  /// then re-arm pending timers at their recorded wake times.
  #[instrument(name = "process_resume", skip(self))]
  pub fn resume(&self) -> Result<(), EngineError> {
    self.ensure_live()?;
    let (continuations, timers) = self.inner.state.write(|s| {
      if !s.is_suspended() {
        return Err(EngineError::NotSuspended);
      }
      s.set_suspended(false);
      Ok((
        s.path_mut().drain_continuations(),
        s.path().timers().to_vec(),
      ))
    })?;

    info!(
      instance_id = %self.instance_id(),
      continuations = continuations.len(),
      timers = timers.len(),
      "process_resumed"
    );
    self.log(StateLogLevel::Info, "process resumed");

    for continuation in continuations {
      self.advance(continuation.source_id.as_deref(), &continuation.target_id);
    }
    for timer in timers {
      self.schedule_timer(&timer.element_id, timer.wake_at);
    }
    Ok(())
  }

  pub fn suspension_state(&self) -> SuspensionState {
    if !self.inner.state.read(|s| s.is_suspended()) {
      return SuspensionState::Running;
    }
    if self.inner.state.in_flight() > 0 {
      SuspensionState::Suspending
    } else {
      SuspensionState::Suspended
    }
  }

  /// Replace the instance state with a snapshot.
  ///
  /// Returns `Ok(false)`, leaving the state untouched, when the snapshot has an
  /// unknown format version or refers to elements this definition lacks. A
  /// suspended snapshot is resumed when `auto_resume` is set; otherwise its
  /// timers are re-armed right away.
  #[instrument(name = "process_load_state", skip(self, snapshot), fields(instance_id = %snapshot.instance_id))]
  pub fn load_state(&self, snapshot: ProcessSnapshot, auto_resume: bool) -> Result<bool, EngineError> {
    self.ensure_live()?;
    let graph = Arc::clone(&self.inner.graph);
    if let Err(e) = snapshot.check(|id| graph.contains(id)) {
      warn!(error = %e, "snapshot_rejected");
      return Ok(false);
    }

    self.inner.timers.cancel_all();
    let (suspended, timers) = self.inner.state.write(|s| {
      s.restore(snapshot);
      (s.is_suspended(), s.path().timers().to_vec())
    });
    self.sync_completion();
    info!(suspended, timers = timers.len(), "state_loaded");

    if suspended {
      if auto_resume {
        self.resume()?;
      }
    } else {
      for timer in timers {
        self.schedule_timer(&timer.element_id, timer.wake_at);
      }
    }
    Ok(true)
  }

  /// Record a pending timer for an event and schedule its wake.
  pub(crate) fn arm_timer(&self, source: Option<&str>, event: &Element, wake_at: DateTime<Utc>) {
    self.inner.state.write(|s| {
      s.path_mut().add_timer(PendingTimer {
        element_id: event.id.clone(),
        source_id: source.map(str::to_string),
        wake_at,
      });
      s.path_mut()
        .push(StepRecord::new(source, &event.id, StepStatus::Suspended));
    });
    info!(element_id = %event.id, wake_at = %wake_at, "timer_armed");
    self.schedule_timer(&event.id, wake_at);
  }

  pub(crate) fn schedule_timer(&self, element_id: &str, wake_at: DateTime<Utc>) {
    let delay = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let instance = Arc::downgrade(&self.inner);
    let id = element_id.to_string();
    self.inner.timers.arm(element_id, delay, move || {
      if let Some(inner) = instance.upgrade() {
        ProcessInstance::from_inner(inner).fire_timer(&id);
      }
    });
  }

  /// Wake an event whose timer elapsed. Does nothing while suspended; the
  /// record stays and `resume()` re-arms it.
  fn fire_timer(&self, element_id: &str) {
    if self.is_disposed() {
      return;
    }
    let _step = self.inner.state.enter();
    let fired = self.inner.state.write(|s| {
      if s.is_suspended() {
        return None;
      }
      s.path_mut().take_timer(element_id)
    });
    let Some(timer) = fired else {
      debug!(element_id = %element_id, "timer_fire_skipped");
      return;
    };

    let graph = Arc::clone(&self.inner.graph);
    let Some(event) = graph.element(element_id) else {
      return;
    };
    info!(element_id = %element_id, "timer_fired");
    let next = self.complete_event(timer.source_id.as_deref(), event);
    self.run(next);
    self.notify_state_change();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wake_time_after_delay() {
    let before = Utc::now();
    let wake_at = wake_time_after("wait", 1500).unwrap();
    assert!(wake_at >= before + TimeDelta::milliseconds(1500));
    assert!(wake_at < before + TimeDelta::milliseconds(2500));
  }

  #[test]
  fn test_wake_time_out_of_range() {
    for delay_ms in [u64::MAX, i64::MAX as u64, 1_000_000_000_000_000_000] {
      let fault = wake_time_after("wait", delay_ms).unwrap_err();
      assert_eq!(fault.name, "InvalidTimer");
      assert!(fault.message.contains("'wait'"));
    }
  }
}
