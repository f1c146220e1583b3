//! Cancellable timers keyed by element id.
//!
//! Each timer is a tokio task racing `sleep_until` against its own
//! cancellation token, a child of the scheduler's root token. The fire
//! callback runs on the blocking pool because it drives the dispatcher,
//! which takes locks and calls host code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct Armed {
  next_generation: u64,
  timers: HashMap<String, (u64, CancellationToken)>,
}

pub(crate) struct TimerScheduler {
  handle: Handle,
  /// Present when no runtime was current at construction.
  runtime: Option<Runtime>,
  root: CancellationToken,
  armed: Arc<Mutex<Armed>>,
}

impl TimerScheduler {
  /// Use the current tokio runtime, or start a small one owned by the scheduler.
  pub(crate) fn new() -> std::io::Result<Self> {
    let (handle, runtime) = match Handle::try_current() {
      Ok(handle) => (handle, None),
      Err(_) => {
        let runtime = tokio::runtime::Builder::new_multi_thread()
          .worker_threads(1)
          .thread_name("bpmflow-timer")
          .enable_all()
          .build()?;
        (runtime.handle().clone(), Some(runtime))
      }
    };
    Ok(Self {
      handle,
      runtime,
      root: CancellationToken::new(),
      armed: Arc::new(Mutex::new(Armed::default())),
    })
  }

  /// Arm a timer for `element_id`, replacing (and cancelling) any earlier one.
  pub(crate) fn arm(&self, element_id: &str, delay: Duration, fire: impl FnOnce() + Send + 'static) {
    if self.root.is_cancelled() {
      return;
    }

    let token = self.root.child_token();
    let generation = {
      let mut armed = self.armed.lock();
      armed.next_generation += 1;
      let generation = armed.next_generation;
      if let Some((_, previous)) = armed
        .timers
        .insert(element_id.to_string(), (generation, token.clone()))
      {
        previous.cancel();
      }
      generation
    };

    debug!(element_id = %element_id, delay_ms = delay.as_millis() as u64, "timer_armed");

    let armed = Arc::clone(&self.armed);
    let element_id = element_id.to_string();
    let deadline = tokio::time::Instant::now() + delay;
    self.handle.spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {
          debug!(element_id = %element_id, "timer_cancelled");
        }
        _ = tokio::time::sleep_until(deadline) => {
          {
            let mut armed = armed.lock();
            if armed.timers.get(&element_id).is_some_and(|(g, _)| *g == generation) {
              armed.timers.remove(&element_id);
            }
          }
          let _ = tokio::task::spawn_blocking(fire).await;
        }
      }
    });
  }

  /// Cancel every armed timer. The scheduler stays usable.
  pub(crate) fn cancel_all(&self) {
    let mut armed = self.armed.lock();
    for (_, (_, token)) in armed.timers.drain() {
      token.cancel();
    }
  }

  #[cfg(test)]
  pub(crate) fn armed_count(&self) -> usize {
    self.armed.lock().timers.len()
  }

  /// Cancel every timer for good; later `arm` calls are ignored.
  pub(crate) fn shutdown(&self) {
    self.root.cancel();
    self.armed.lock().timers.clear();
  }
}

impl Drop for TimerScheduler {
  fn drop(&mut self) {
    self.root.cancel();
    if let Some(runtime) = self.runtime.take() {
      runtime.shutdown_background();
    }
  }
}
