use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::state::ProcessState;

struct Guarded {
  state: ProcessState,
  in_flight: usize,
}

/// The one lock around a [`ProcessState`].
///
/// The state is only reachable inside [`SharedState::read`] or
/// [`SharedState::write`], so every mutation goes through the same mutex.
/// The wrapper also counts in-flight dispatch steps so a suspend can wait for
/// them to reach a boundary.
pub struct SharedState {
  inner: Mutex<Guarded>,
  settled: Condvar,
}

impl SharedState {
  pub fn new(state: ProcessState) -> Self {
    Self {
      inner: Mutex::new(Guarded {
        state,
        in_flight: 0,
      }),
      settled: Condvar::new(),
    }
  }

  pub fn read<R>(&self, f: impl FnOnce(&ProcessState) -> R) -> R {
    f(&self.inner.lock().state)
  }

  pub fn write<R>(&self, f: impl FnOnce(&mut ProcessState) -> R) -> R {
    f(&mut self.inner.lock().state)
  }

  /// Mark a dispatch step as running until the guard drops.
  pub fn enter(&self) -> StepGuard<'_> {
    self.inner.lock().in_flight += 1;
    StepGuard { shared: self }
  }

  pub fn in_flight(&self) -> usize {
    self.inner.lock().in_flight
  }

  /// Block until no dispatch step is running, or `timeout` elapses.
  /// Returns whether the steps settled.
  pub fn wait_settled(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut guard = self.inner.lock();
    while guard.in_flight > 0 {
      if self.settled.wait_until(&mut guard, deadline).timed_out() {
        return guard.in_flight == 0;
      }
    }
    true
  }
}

/// Held for the duration of one dispatch step.
pub struct StepGuard<'a> {
  shared: &'a SharedState,
}

impl Drop for StepGuard<'_> {
  fn drop(&mut self) {
    let mut guard = self.shared.inner.lock();
    guard.in_flight = guard.in_flight.saturating_sub(1);
    if guard.in_flight == 0 {
      self.shared.settled.notify_all();
    }
  }
}
