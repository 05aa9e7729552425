//! One-shot timers with coalescing, reset and cancel.
//!
//! A `ScheduledTask` holds at most one pending run. Scheduling while a run
//! is pending is a no-op, which is what makes it a debounce. The pending
//! slot is cleared before the callback runs, so anything scheduled from
//! inside the callback (or concurrently with it) starts a fresh timer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Default)]
struct TimerState {
    /// Bumped on every schedule and cancel; a run whose generation is stale
    /// must not fire.
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// A cancellable, resettable delayed callback.
pub struct ScheduledTask {
    name: &'static str,
    delay: Duration,
    state: Arc<Mutex<TimerState>>,
}

impl ScheduledTask {
    /// Creates an idle timer that fires `delay` after being scheduled.
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Returns the configured delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `callback` unless a run is already pending.
    ///
    /// Returns true if a new run was scheduled. Must be called from within a
    /// tokio runtime; outside one the call is logged and ignored.
    pub fn schedule<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return false;
        }
        self.arm(&mut state, callback)
    }

    /// Cancels any pending run and schedules `callback` after a full delay.
    pub fn reset<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        Self::disarm(&mut state);
        self.arm(&mut state, callback)
    }

    /// Cancels the pending run, if any. Returns true if one was pending.
    pub fn cancel(&self) -> bool {
        Self::disarm(&mut self.state.lock())
    }

    /// Returns true if a run is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    fn arm<F>(&self, state: &mut TimerState, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(timer = self.name, error = %e, "cannot schedule outside a runtime");
                return false;
            }
        };

        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let delay = self.delay;
        state.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.pending = None;
            }
            callback();
        }));
        true
    }

    fn disarm(state: &mut TimerState) -> bool {
        state.generation = state.generation.wrapping_add(1);
        match state.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}
