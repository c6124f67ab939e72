use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct GateState {
    set: bool,
    // Bumped by `wake` so waiters return without the gate being set.
    generation: u64,
}

/// Binary gate: set means runnable, cleared means paused.
#[derive(Debug)]
pub struct Signal {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Signal {
    pub fn new(set: bool) -> Self {
        Self {
            state: Mutex::new(GateState { set, generation: 0 }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_set(&self) -> bool {
        self.lock().set
    }

    pub fn set(&self) {
        self.lock().set = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        self.lock().set = false;
    }

    /// Release current waiters without changing the gate.
    pub fn wake(&self) {
        self.lock().generation += 1;
        self.cond.notify_all();
    }

    /// Wait until the gate is set, `wake` is called, or `timeout` passes.
    /// Returns whether the gate is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let start = guard.generation;
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |s| !s.set && s.generation == start)
            .unwrap_or_else(PoisonError::into_inner);
        guard.set
    }
}
