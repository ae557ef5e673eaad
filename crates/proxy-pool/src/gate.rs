//! Capacity gate: a counting semaphore with bounded waits.
//!
//! One permit corresponds to one pool slot, held from
//! creation-attempt-begin until the resource is returned or destroyed.
//! The gate is independent of the pool's main lock and is always taken
//! before it, so holding the gate never blocks registry operations.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of a gate acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateAcquire {
    /// A permit was taken
    Acquired,
    /// The wait bound elapsed with no permit available
    TimedOut,
    /// The gate was closed (pool shutdown)
    Closed,
}

struct GateState {
    permits: usize,
    closed: bool,
}

/// Counting semaphore over `parking_lot` primitives.
pub(crate) struct Gate {
    state: Mutex<GateState>,
    available: Condvar,
}

impl Gate {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                permits,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Take one permit, waiting at most `timeout` (`None` = wait forever).
    pub(crate) fn acquire(&self, timeout: Option<Duration>) -> GateAcquire {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return GateAcquire::Closed;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return GateAcquire::Acquired;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        // Re-check: a permit may have arrived with the wakeup
                        if !state.closed && state.permits > 0 {
                            state.permits -= 1;
                            return GateAcquire::Acquired;
                        }
                        return if state.closed {
                            GateAcquire::Closed
                        } else {
                            GateAcquire::TimedOut
                        };
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Take one permit only if one is free right now; never blocks.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if !state.closed && state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Return one permit and wake one waiter.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        drop(state);
        self.available.notify_one();
    }

    /// Close the gate: all current and future waiters fail immediately.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}
