// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Command buffers and their completion protocol.

A command buffer moves strictly forward through [Status]:

```text
NotCommitted -> Committed -> Scheduled -> Completed
                         |             \-> Error
                         \-> Error
```

`commit` moves it to `Committed` on the calling thread. Everything after that happens on the
device's completion thread. A command buffer with an encoding fault, or one the backend
refuses, is never scheduled: it goes from `Committed` straight to `Error`.

There are three ways to find out a command buffer is done, and they can be mixed freely:

* [CommandBuffer::commit_with_callback] runs a callback exactly once, on the completion thread.
* [CommandBuffer::wait_until_completed] blocks.
* [CommandBuffer::completed] returns a future.
*/
pub(crate) mod completion;
pub(crate) mod sequencer;

use crate::command_queue::CommandQueue;
use crate::encoder::{ComputeEncoder, EncodingFault, RecordedPass};
use crate::error::Error;
use crate::imp;
use completion::Completion;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a command buffer is in its lifecycle.
///
/// The discriminants are the numeric codes used at the C boundary. `Scheduled` is skipped by
/// command buffers that fail before reaching the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum Status {
    #[default]
    NotCommitted = 0,
    Committed = 1,
    Scheduled = 2,
    Completed = 3,
    Error = 4,
}

impl Status {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    /// [Error::Execution] for [Status::Error], the status otherwise.
    pub fn check(self) -> Result<Status, Error> {
        match self {
            Status::Error => Err(Error::Execution),
            other => Ok(other),
        }
    }
}

#[derive(Debug, Default)]
struct Recording {
    passes: Vec<RecordedPass>,
    faults: Vec<EncodingFault>,
    encoder_open: bool,
    committed: bool,
}

#[derive(Debug)]
struct Shared {
    queue: CommandQueue,
    completion: Arc<Completion>,
    recording: Mutex<Recording>,
}

/**
One unit of recorded GPU work.

Clones refer to the same command buffer. Dropping every clone before completion is fine; the
work still runs and any registered callback still fires.
*/
#[derive(Debug, Clone)]
pub struct CommandBuffer(Arc<Shared>);

impl CommandBuffer {
    pub(crate) fn new(queue: CommandQueue) -> Self {
        CommandBuffer(Arc::new(Shared {
            queue,
            completion: Arc::new(Completion::new()),
            recording: Mutex::new(Recording::default()),
        }))
    }

    fn recording(&self) -> MutexGuard<'_, Recording> {
        self.0.recording.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.0.queue
    }

    /// The current status. Another thread may advance it at any moment.
    pub fn status(&self) -> Status {
        self.0.completion.status()
    }

    /// Opens an encoder, or `None` if one is already open or the buffer was committed.
    pub fn compute_encoder(&self) -> Option<ComputeEncoder> {
        {
            let mut recording = self.recording();
            if recording.committed {
                logwise::warn_sync!("compute_encoder on a committed command buffer");
                return None;
            }
            if recording.encoder_open {
                logwise::warn_sync!("compute_encoder while another encoder is open");
                return None;
            }
            recording.encoder_open = true;
        }
        Some(ComputeEncoder::new(self.clone()))
    }

    pub(crate) fn end_encoder(&self, pass: RecordedPass, faults: Vec<EncodingFault>) {
        let mut recording = self.recording();
        if recording.committed {
            //already faulted with OpenAtCommit
            logwise::warn_sync!("encoder ended after its command buffer was committed");
            return;
        }
        recording.encoder_open = false;
        recording.passes.push(pass);
        recording.faults.extend(faults);
    }

    /// Submits the recorded work. A second commit is logged and ignored.
    pub fn commit(&self) {
        self.commit_inner(None)
    }

    /**
    Submits the recorded work, and calls `callback` with the terminal status.

    The callback runs exactly once, on the device's completion thread. It must not block on
    other work for the same device.
    */
    pub fn commit_with_callback(&self, callback: impl FnOnce(Status) + Send + 'static) {
        self.commit_inner(Some(Box::new(callback)))
    }

    fn commit_inner(&self, callback: Option<Box<dyn FnOnce(Status) + Send>>) {
        let (passes, faults) = {
            let mut recording = self.recording();
            if recording.committed {
                drop(recording);
                logwise::warn_sync!("command buffer committed twice; ignoring");
                if let Some(callback) = callback {
                    self.0.completion.on_finish(callback);
                }
                return;
            }
            recording.committed = true;
            if recording.encoder_open {
                recording.faults.push(EncodingFault::OpenAtCommit);
            }
            (
                std::mem::take(&mut recording.passes),
                std::mem::take(&mut recording.faults),
            )
        };
        if let Some(callback) = callback {
            self.0.completion.on_finish(callback);
        }

        let queue = &self.0.queue;
        let device = &queue.device().0;
        let _submission = queue.lock_submission();
        self.0.completion.advance(Status::Committed);
        let ticket = queue.sequencer().issue(self.0.completion.clone());
        if faults.is_empty() {
            if imp::submit(device, passes, ticket) {
                self.0.completion.advance(Status::Scheduled);
            }
        } else {
            for fault in &faults {
                logwise::error_sync!(
                    "command buffer not submitted: {fault}",
                    fault = logwise::privacy::LogIt(fault)
                );
            }
            imp::fail(device, ticket);
        }
    }

    /**
    Blocks until the command buffer is terminal and returns the terminal status.

    A command buffer that was never committed returns [Status::NotCommitted] right away.
    Don't call this from a completion callback of the same device; it would never return.
    */
    pub fn wait_until_completed(&self) -> Status {
        if self.status() == Status::NotCommitted {
            logwise::warn_sync!("wait_until_completed on a command buffer that was never committed");
            return Status::NotCommitted;
        }
        let wait = logwise::perfwarn_begin!("CommandBuffer::wait_until_completed");
        let status = self.0.completion.wait();
        drop(wait);
        status
    }

    /// Resolves to the terminal status.
    pub fn completed(&self) -> impl Future<Output = Status> + use<> {
        let (sender, future) = r#continue::continuation();
        self.0.completion.on_finish(move |status| sender.send(status));
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let all = [
            Status::NotCommitted,
            Status::Committed,
            Status::Scheduled,
            Status::Completed,
            Status::Error,
        ];
        for (code, status) in all.iter().enumerate() {
            assert_eq!(*status as u32, code as u32);
        }
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.iter().filter(|s| s.is_terminal()).count(), 2);
    }

    #[test]
    fn only_error_fails_check() {
        assert!(matches!(Status::Error.check(), Err(Error::Execution)));
        assert_eq!(Status::Completed.check().unwrap(), Status::Completed);
    }
}
