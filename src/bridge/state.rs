//! Connection lifecycle

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

/// Shared state with a condvar for waiters. Only moves forward.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connecting),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        // A panicking handler must not wedge shutdown
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> ConnectionState {
        *self.lock()
    }

    /// Move to `to` if it is later than the current state and the current
    /// state is not terminal. Returns whether the state changed.
    pub fn transition(&self, to: ConnectionState) -> bool {
        let mut state = self.lock();
        if state.is_terminal() || to <= *state {
            return false;
        }
        *state = to;
        drop(state);
        self.changed.notify_all();
        true
    }

    pub fn wait_terminal(&self) -> ConnectionState {
        let mut state = self.lock();
        while !state.is_terminal() {
            state = self.changed.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *state
    }

    /// Returns the terminal state, or `None` on timeout.
    pub fn wait_terminal_timeout(&self, timeout: Duration) -> Option<ConnectionState> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        Some(*state)
    }
}
