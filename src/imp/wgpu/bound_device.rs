// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::Error;
use super::entry_point::EntryPoint;
use crate::device::{DeviceOptions, PowerPreference};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use wgpu::{PollType, Trace};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Internal resource management for BoundDevice
/// This type owns the actual GPU resources and handles cleanup
#[derive(Debug)]
struct BoundDeviceResources {
    id: u64,
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    poll_thread: Option<JoinHandle<()>>,
    poll_thread_id: Option<ThreadId>,
    poll_trigger: Option<Sender<PollRequest>>,
}

/// Work for the completion thread.
enum PollRequest {
    /// GPU work may be ready
    Poll,
    /// Run on the completion thread
    Run(Box<dyn FnOnce() + Send>),
}

/// A wgpu device plus the thread that drives its completions.
/// Multiple instances share the same underlying GPU resources.
#[derive(Debug, Clone)]
pub(crate) struct BoundDevice {
    resources: Arc<BoundDeviceResources>,
}

impl BoundDevice {
    /// Asks the shared instance for an adapter matching `options`.
    pub(crate) fn pick(options: &DeviceOptions) -> Result<wgpu::Adapter, Error> {
        let power_preference = match options.power_preference {
            PowerPreference::None => wgpu::PowerPreference::None,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        };
        let request = wgpu::RequestAdapterOptions {
            power_preference,
            force_fallback_adapter: options.force_fallback_adapter,
            compatible_surface: None,
        };
        test_executors::sleep_on(EntryPoint::shared().request_adapter(&request))
            .map_err(|_| Error::NoSuchAdapter)
    }

    pub(crate) fn enumerate_adapters() -> Vec<wgpu::Adapter> {
        EntryPoint::shared().enumerate_adapters(wgpu::Backends::all())
    }

    pub(crate) fn bind(adapter: wgpu::Adapter, label: &str) -> Result<Self, Error> {
        let descriptor = wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: Default::default(),
            //pipelines are validated against what the hardware reports
            required_limits: adapter.limits(),
            memory_hints: Default::default(),
            trace: Trace::Off,
        };
        let (device, queue) = test_executors::sleep_on(adapter.request_device(&descriptor))?;
        //the default handler panics, which must never reach a foreign caller
        device.on_uncaptured_error(Box::new(|e| {
            logwise::error_sync!(
                "uncaptured wgpu error: {e}",
                e = logwise::privacy::LogIt(&e)
            );
        }));

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let poll_device = device.clone();
        let (poll_sender, poll_receiver): (Sender<PollRequest>, Receiver<PollRequest>) =
            mpsc::channel();
        let poll_thread = thread::Builder::new()
            .name(format!("kq_completion_{id}"))
            .spawn(move || {
                // Exits once every trigger has been dropped
                while let Ok(request) = poll_receiver.recv() {
                    match request {
                        PollRequest::Poll => {
                            // Poll until the queue is empty
                            if let Err(e) = poll_device.poll(PollType::Wait) {
                                logwise::error_sync!(
                                    "device poll failed: {e}",
                                    e = logwise::privacy::LogIt(&e)
                                );
                            }
                        }
                        PollRequest::Run(f) => f(),
                    }
                }
            })
            .map_err(|e| Error::Unsupported(format!("can't spawn completion thread: {e}")))?;
        let poll_thread_id = Some(poll_thread.thread().id());
        logwise::info_sync!(
            "bound device {id} on adapter {name}",
            id = id,
            name = logwise::privacy::LogIt(&adapter.get_info().name)
        );
        Ok(BoundDevice {
            resources: Arc::new(BoundDeviceResources {
                id,
                device,
                queue,
                adapter,
                poll_thread: Some(poll_thread),
                poll_thread_id,
                poll_trigger: Some(poll_sender),
            }),
        })
    }

    /// Signal the completion thread that GPU work may be ready
    pub(crate) fn set_needs_poll(&self) {
        if let Some(trigger) = &self.resources.poll_trigger {
            // ignore if the thread is gone
            let _ = trigger.send(PollRequest::Poll);
        }
    }

    /// Runs `f` on the completion thread, after anything already queued there.
    ///
    /// If the thread is gone, `f` is dropped without running.
    pub(crate) fn run_on_completion_thread(&self, f: impl FnOnce() + Send + 'static) {
        if let Some(trigger) = &self.resources.poll_trigger {
            let _ = trigger.send(PollRequest::Run(Box::new(f)));
        }
    }

    /// Runs `f` inside validation and out-of-memory error scopes and reports the first error.
    pub(crate) fn scoped<R>(&self, f: impl FnOnce(&wgpu::Device) -> R) -> (R, Option<wgpu::Error>) {
        let device = &self.resources.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let r = f(device);
        let validation = test_executors::sleep_on(device.pop_error_scope());
        let out_of_memory = test_executors::sleep_on(device.pop_error_scope());
        (r, validation.or(out_of_memory))
    }

    pub(crate) fn id(&self) -> u64 {
        self.resources.id
    }

    pub(crate) fn name(&self) -> String {
        self.resources.adapter.get_info().name
    }

    pub(crate) fn limits(&self) -> wgpu::Limits {
        self.resources.device.limits()
    }

    /// Access to the wgpu device
    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.resources.device
    }

    /// Access to the wgpu queue
    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.resources.queue
    }
}

impl Drop for BoundDeviceResources {
    fn drop(&mut self) {
        // Closing the channel lets the completion thread exit
        drop(self.poll_trigger.take());
        if let Some(handle) = self.poll_thread.take() {
            //the last reference may go away inside a completion callback
            if Some(thread::current().id()) == self.poll_thread_id {
                return;
            }
            let _ = handle.join();
        }
    }
}
