use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Process-completion signal, set at most once.
#[derive(Default)]
pub(crate) struct CompletionLatch {
  done: Mutex<bool>,
  signal: Condvar,
}

impl CompletionLatch {
  /// Returns `true` only for the call that set the latch.
  pub(crate) fn set(&self) -> bool {
    let mut done = self.done.lock();
    if *done {
      return false;
    }
    *done = true;
    self.signal.notify_all();
    true
  }

  pub(crate) fn is_set(&self) -> bool {
    *self.done.lock()
  }

  /// Wait for the latch, forever when `timeout` is `None`.
  pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
    let mut done = self.done.lock();
    match timeout {
      None => {
        while !*done {
          self.signal.wait(&mut done);
        }
        true
      }
      Some(timeout) => {
        let deadline = Instant::now() + timeout;
        while !*done {
          if self.signal.wait_until(&mut done, deadline).timed_out() {
            return *done;
          }
        }
        true
      }
    }
  }
}
