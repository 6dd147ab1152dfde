// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::command_buffer::CommandBuffer;
use crate::command_buffer::sequencer::Sequencer;
use crate::device::Device;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Shared {
    device: Device,
    /// Held from ticket issue through backend submission, so both happen in commit order.
    submit_lock: Mutex<()>,
    sequencer: Arc<Sequencer>,
}

/**
An ordered submission channel.

Command buffers committed to one queue run, and report completion, in commit order.
There is no ordering between queues.
*/
#[derive(Debug, Clone)]
pub struct CommandQueue(Arc<Shared>);

impl CommandQueue {
    pub(crate) fn new(device: Device) -> Self {
        CommandQueue(Arc::new(Shared {
            device,
            submit_lock: Mutex::new(()),
            sequencer: Arc::new(Sequencer::default()),
        }))
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    /// A new command buffer in [crate::Status::NotCommitted].
    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(self.clone())
    }

    pub(crate) fn lock_submission(&self) -> MutexGuard<'_, ()> {
        self.0.submit_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn sequencer(&self) -> &Arc<Sequencer> {
        &self.0.sequencer
    }
}
