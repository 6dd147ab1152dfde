// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
In-order publication of command buffer results.

The GPU finishes same-queue work in order, but the callbacks that tell us about it (queue
completion, readback mappings) may arrive in any order. Each committed command buffer takes a
ticket; a result is only published once every earlier ticket on the queue has been published.
*/
use super::Status;
use super::completion::Completion;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    next_ticket: u64,
    next_publish: u64,
    ready: BTreeMap<u64, (Arc<Completion>, Status)>,
    /// Some thread is inside the publish loop.
    publishing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Sequencer {
    state: Mutex<State>,
}

impl Sequencer {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the next ticket. Must be called in commit order.
    pub(crate) fn issue(self: &Arc<Self>, completion: Arc<Completion>) -> TicketGuard {
        let mut state = self.lock();
        let number = state.next_ticket;
        state.next_ticket += 1;
        TicketGuard {
            sequencer: self.clone(),
            number,
            completion: Some(completion),
        }
    }

    fn ready(&self, number: u64, completion: Arc<Completion>, status: Status) {
        let mut state = self.lock();
        state.ready.insert(number, (completion, status));
        if state.publishing {
            //whoever is publishing will pick it up
            return;
        }
        state.publishing = true;
        loop {
            let next = state.next_publish;
            match state.ready.remove(&next) {
                Some((completion, status)) => {
                    state.next_publish += 1;
                    drop(state);
                    completion.finish(status);
                    state = self.lock();
                }
                None => {
                    state.publishing = false;
                    return;
                }
            }
        }
    }
}

/**
The right to publish one command buffer's result.

Dropping the guard without reporting publishes [Status::Error], so a result is published even
if the backend discards our callbacks.
*/
#[derive(Debug)]
pub(crate) struct TicketGuard {
    sequencer: Arc<Sequencer>,
    number: u64,
    completion: Option<Arc<Completion>>,
}

impl TicketGuard {
    pub(crate) fn report(mut self, status: Status) {
        if let Some(completion) = self.completion.take() {
            self.sequencer.ready(self.number, completion, status);
        }
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            logwise::warn_sync!(
                "ticket {number} dropped without a result",
                number = self.number
            );
            self.sequencer.ready(self.number, completion, Status::Error);
        }
    }
}
