// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Turns recorded passes into a wgpu submission and reports when it's done.

A command buffer is done once the queue reports its work done *and* every readback copy has
landed in its buffer's shadow. Whichever callback arrives last publishes the result.
*/
use super::library::BindingKind;
use super::{BoundDevice, Buffer, ComputePipeline};
use crate::command_buffer::Status;
use crate::command_buffer::sequencer::TicketGuard;
use crate::encoder::{Command, RecordedPass};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wgpu::util::DeviceExt;

enum Binding {
    Buffer { buffer: Arc<Buffer>, offset: u64 },
    Bytes(wgpu::Buffer),
}

struct PlannedDispatch {
    pipeline: Arc<ComputePipeline>,
    bind_group: wgpu::BindGroup,
    threadgroups: [u32; 3],
}

/// Buffers one submission touches.
#[derive(Default)]
struct Residency {
    buffers: Vec<Arc<Buffer>>,
    /// CPU-visible buffers the GPU may write
    readback: Vec<Arc<Buffer>>,
}

impl Residency {
    fn use_buffer(&mut self, buffer: &Arc<Buffer>, writable: bool) {
        if !self.buffers.iter().any(|b| Arc::ptr_eq(b, buffer)) {
            self.buffers.push(buffer.clone());
        }
        if writable
            && buffer.mode().is_cpu_visible()
            && !self.readback.iter().any(|b| Arc::ptr_eq(b, buffer))
        {
            self.readback.push(buffer.clone());
        }
    }
}

/// Bytes visible to the kernel: the rest of the buffer, padded to a whole word.
///
/// `None` only for an empty range, which the encoder has already faulted.
fn binding_size(length: usize, offset: u64) -> Option<wgpu::BufferSize> {
    let remaining = (length as u64).saturating_sub(offset);
    wgpu::BufferSize::new(remaining.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT))
}

/// Resolves bindings at each dispatch into bind groups.
fn plan(
    device: &wgpu::Device,
    passes: &[RecordedPass],
    residency: &mut Residency,
) -> Result<Vec<Vec<PlannedDispatch>>, String> {
    let mut planned = Vec::with_capacity(passes.len());
    for pass in passes {
        let mut pipeline: Option<&Arc<ComputePipeline>> = None;
        let mut bindings: BTreeMap<u32, Binding> = BTreeMap::new();
        let mut dispatches = Vec::new();
        for command in &pass.commands {
            match command {
                Command::SetPipeline(p) => pipeline = Some(p),
                Command::SetBuffer {
                    index,
                    buffer,
                    offset,
                } => {
                    bindings.insert(
                        *index,
                        Binding::Buffer {
                            buffer: buffer.clone(),
                            offset: *offset,
                        },
                    );
                }
                Command::SetBytes { index, bytes } => {
                    let gpu = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("kq bytes"),
                        contents: bytes,
                        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM,
                    });
                    bindings.insert(*index, Binding::Bytes(gpu));
                }
                Command::Dispatch { threadgroups } => {
                    let pipeline = pipeline.ok_or("dispatch without a pipeline")?;
                    let mut entries = Vec::with_capacity(pipeline.bindings().len());
                    for (index, kind) in pipeline.bindings() {
                        let resource = match bindings.get(index) {
                            Some(Binding::Buffer { buffer, offset }) => {
                                let writable = *kind == BindingKind::Storage { read_only: false };
                                residency.use_buffer(buffer, writable);
                                wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                    buffer: buffer.gpu(),
                                    offset: *offset,
                                    size: binding_size(buffer.length(), *offset),
                                })
                            }
                            Some(Binding::Bytes(gpu)) => gpu.as_entire_binding(),
                            None => {
                                return Err(format!(
                                    "`{}` dispatched without a binding at index {index}",
                                    pipeline.function_name()
                                ));
                            }
                        };
                        entries.push(wgpu::BindGroupEntry {
                            binding: *index,
                            resource,
                        });
                    }
                    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("kq bindings"),
                        layout: pipeline.layout(),
                        entries: &entries,
                    });
                    dispatches.push(PlannedDispatch {
                        pipeline: pipeline.clone(),
                        bind_group,
                        threadgroups: *threadgroups,
                    });
                }
            }
        }
        planned.push(dispatches);
    }
    Ok(planned)
}

struct JoinState {
    remaining: usize,
    failed: bool,
    ticket: Option<TicketGuard>,
}

/// Counts down the callbacks one submission is waiting for.
struct Join(Mutex<JoinState>);

impl Join {
    fn arrive(&self, ok: bool) {
        let ticket = {
            let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
            state.remaining -= 1;
            state.failed |= !ok;
            if state.remaining > 0 {
                return;
            }
            state.ticket.take().map(|t| (t, state.failed))
        };
        if let Some((ticket, failed)) = ticket {
            ticket.report(if failed {
                Status::Error
            } else {
                Status::Completed
            });
        }
    }
}

/**
Submits `passes` and arranges for `ticket` to be reported on the completion thread.

Returns whether the work was accepted by the backend. When it wasn't, the ticket reports
[Status::Error].
*/
pub(crate) fn submit(device: &BoundDevice, passes: Vec<RecordedPass>, ticket: TicketGuard) -> bool {
    let mut residency = Residency::default();
    let (result, error) = device.scoped(|d| {
        let planned = plan(d, &passes, &mut residency)?;
        for buffer in &residency.buffers {
            buffer.upload();
        }
        let mut encoder = d.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("kq command buffer"),
        });
        for buffer in &residency.buffers {
            buffer.prepare(&mut encoder);
        }
        for dispatches in &planned {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kq compute pass"),
                timestamp_writes: None,
            });
            for dispatch in dispatches {
                pass.set_pipeline(dispatch.pipeline.pipeline());
                pass.set_bind_group(0, &dispatch.bind_group, &[]);
                let [x, y, z] = dispatch.threadgroups;
                pass.dispatch_workgroups(x, y, z);
            }
        }
        let staging: Vec<(Arc<Buffer>, wgpu::Buffer)> = residency
            .readback
            .iter()
            .filter_map(|b| b.record_readback(&mut encoder).map(|s| (b.clone(), s)))
            .collect();
        device.queue().submit(std::iter::once(encoder.finish()));
        Ok::<_, String>(staging)
    });

    let staging = match (result, error) {
        (Ok(staging), None) => staging,
        (Err(message), _) => {
            logwise::error_sync!(
                "command buffer rejected: {message}",
                message = logwise::privacy::LogIt(&message)
            );
            fail(device, ticket);
            return false;
        }
        (Ok(_), Some(e)) => {
            logwise::error_sync!(
                "command buffer failed validation: {e}",
                e = logwise::privacy::LogIt(&e)
            );
            fail(device, ticket);
            return false;
        }
    };

    logwise::trace_sync!(
        "submitted command buffer with {readbacks} readbacks",
        readbacks = staging.len()
    );
    let join = Arc::new(Join(Mutex::new(JoinState {
        remaining: staging.len() + 1,
        failed: false,
        ticket: Some(ticket),
    })));
    let work_done = join.clone();
    device
        .queue()
        .on_submitted_work_done(move || work_done.arrive(true));
    for (buffer, staging) in staging {
        let move_staging = staging.clone();
        let move_join = join.clone();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| match result {
                Ok(()) => {
                    buffer.land_readback(&move_staging);
                    move_join.arrive(true);
                }
                Err(e) => {
                    logwise::error_sync!(
                        "readback failed: {e}",
                        e = logwise::privacy::LogIt(&e)
                    );
                    move_join.arrive(false);
                }
            });
    }
    //for map_async to complete, the completion thread has to poll
    device.set_needs_poll();
    true
}

/// Reports [Status::Error] for `ticket` from the completion thread.
pub(crate) fn fail(device: &BoundDevice, ticket: TicketGuard) {
    device.run_on_completion_thread(move || ticket.report(Status::Error));
}
