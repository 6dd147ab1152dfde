// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::Status;
use std::sync::{Condvar, Mutex, MutexGuard};

type Callback = Box<dyn FnOnce(Status) + Send>;

#[derive(Default)]
struct State {
    status: Status,
    callbacks: Vec<Callback>,
}

/// Status of one command buffer, plus everyone waiting for it to become terminal.
pub(crate) struct Completion {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Completion {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn status(&self) -> Status {
        self.lock().status
    }

    /// Moves to a non-terminal `status` if that is forward progress. Otherwise nothing happens.
    pub(crate) fn advance(&self, status: Status) {
        debug_assert!(!status.is_terminal());
        let mut state = self.lock();
        if status > state.status && !state.status.is_terminal() {
            state.status = status;
        }
    }

    /**
    Moves to a terminal status, wakes waiters and runs callbacks.

    Only the first call has any effect. Waiters are released before callbacks run, and
    callbacks run on the calling thread without the lock held.
    */
    pub(crate) fn finish(&self, status: Status) -> bool {
        debug_assert!(status.is_terminal());
        let callbacks = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            std::mem::take(&mut state.callbacks)
        };
        self.condvar.notify_all();
        for callback in callbacks {
            callback(status);
        }
        true
    }

    /// Runs `callback` once the status is terminal; immediately if it already is.
    pub(crate) fn on_finish(&self, callback: impl FnOnce(Status) + Send + 'static) {
        let status = {
            let mut state = self.lock();
            if !state.status.is_terminal() {
                state.callbacks.push(Box::new(callback));
                return;
            }
            state.status
        };
        callback(status);
    }

    /// Blocks until the status is terminal.
    pub(crate) fn wait(&self) -> Status {
        let state = self.lock();
        let state = self
            .condvar
            .wait_while(state, |s| !s.status.is_terminal())
            .unwrap_or_else(|e| e.into_inner());
        state.status
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("status", &self.status())
            .finish()
    }
}
