// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Recording compute work into a command buffer.

An encoder records; nothing reaches the GPU until the command buffer is committed. Mistakes
made while encoding don't fail the call that made them. They are recorded as
[EncodingFault]s and the command buffer finishes in [crate::Status::Error] instead.
*/
use crate::buffer::Buffer;
use crate::command_buffer::CommandBuffer;
use crate::imp;
use crate::pipeline::PipelineState;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The most bytes [ComputeEncoder::set_bytes] accepts.
pub const MAX_BYTES_LENGTH: usize = 4096;

/// A malformed encoding sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingFault {
    #[error("pipeline `{0}` belongs to a different device")]
    ForeignPipeline(String),
    #[error("buffer bound at index {0} belongs to a different device")]
    ForeignBuffer(u32),
    #[error("dispatch without a pipeline")]
    NoPipeline,
    #[error("pipeline `{function}` needs a binding at index {index}")]
    MissingBinding { function: String, index: u32 },
    #[error("offset {offset} at index {index} is beyond a buffer of {length} bytes")]
    OffsetOutOfRange { index: u32, offset: usize, length: usize },
    #[error("{length} bytes at index {index} exceed the 4096 byte limit")]
    BytesTooLong { index: u32, length: usize },
    #[error("offset {offset} at index {index} is not a multiple of the device's {alignment} byte offset alignment")]
    MisalignedOffset {
        index: u32,
        offset: usize,
        alignment: u32,
    },
    #[error("buffer bound at index {index} has no bytes past its offset")]
    EmptyBinding { index: u32 },
    #[error("{threadgroups:?} threadgroups exceed the device limit of {max} per dimension")]
    TooManyThreadgroups { threadgroups: [u32; 3], max: u32 },
    #[error("encoder dropped without end_encoding")]
    NotEnded,
    #[error("command buffer committed with an encoder still open")]
    OpenAtCommit,
}

#[derive(Debug)]
pub(crate) enum Command {
    SetPipeline(Arc<imp::ComputePipeline>),
    SetBuffer {
        index: u32,
        buffer: Arc<imp::Buffer>,
        offset: u64,
    },
    SetBytes {
        index: u32,
        bytes: Vec<u8>,
    },
    Dispatch {
        threadgroups: [u32; 3],
    },
}

/// Everything one encoder recorded, in order.
#[derive(Debug, Default)]
pub(crate) struct RecordedPass {
    pub(crate) commands: Vec<Command>,
}

/// What is currently bound at an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Buffer { offset: usize, length: usize },
    Bytes,
}

/// Device offset alignments for buffer bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OffsetAlignment {
    storage: u32,
    uniform: u32,
}

/// Faults in the bindings `function` needs, given what is bound.
fn binding_faults(
    function: &str,
    wanted: &[(u32, imp::BindingKind)],
    bound: &BTreeMap<u32, Bound>,
    alignment: OffsetAlignment,
) -> Vec<EncodingFault> {
    let mut faults = Vec::new();
    for &(index, kind) in wanted {
        match bound.get(&index) {
            None => faults.push(EncodingFault::MissingBinding {
                function: function.to_string(),
                index,
            }),
            Some(Bound::Bytes) => {}
            Some(&Bound::Buffer { offset, length }) => {
                let required = match kind {
                    imp::BindingKind::Uniform => alignment.uniform,
                    _ => alignment.storage,
                };
                if offset % required.max(1) as usize != 0 {
                    faults.push(EncodingFault::MisalignedOffset {
                        index,
                        offset,
                        alignment: required,
                    });
                } else if offset >= length {
                    faults.push(EncodingFault::EmptyBinding { index });
                }
            }
        }
    }
    faults
}

/**
A transient recording context for one [CommandBuffer].

At most one encoder is open on a command buffer at a time. Call [ComputeEncoder::end_encoding]
when done; dropping an encoder without ending it faults the command buffer.

Binding indices are the `@binding(n)` numbers of `@group(0)` in the shader. A later binding at
an index replaces an earlier one. Only the bindings the pipeline's own kernel uses have to be
set.
*/
#[derive(Debug)]
pub struct ComputeEncoder {
    command_buffer: CommandBuffer,
    device_id: u64,
    max_threadgroups: u32,
    alignment: OffsetAlignment,
    pipeline: Option<Arc<imp::ComputePipeline>>,
    bound: BTreeMap<u32, Bound>,
    pass: RecordedPass,
    faults: Vec<EncodingFault>,
    ended: bool,
}

/// Pads immediate bytes to a bindable size.
fn padded(bytes: &[u8]) -> Vec<u8> {
    let len = bytes.len().next_multiple_of(4).max(4);
    let mut v = Vec::with_capacity(len);
    v.extend_from_slice(bytes);
    v.resize(len, 0);
    v
}

impl ComputeEncoder {
    pub(crate) fn new(command_buffer: CommandBuffer) -> Self {
        let device = command_buffer.queue().device();
        let device_id = device.id();
        let limits = device.0.limits();
        ComputeEncoder {
            command_buffer,
            device_id,
            max_threadgroups: limits.max_compute_workgroups_per_dimension,
            alignment: OffsetAlignment {
                storage: limits.min_storage_buffer_offset_alignment,
                uniform: limits.min_uniform_buffer_offset_alignment,
            },
            pipeline: None,
            bound: BTreeMap::new(),
            pass: RecordedPass::default(),
            faults: Vec::new(),
            ended: false,
        }
    }

    fn fault(&mut self, fault: EncodingFault) {
        logwise::warn_sync!(
            "encoding fault: {fault}",
            fault = logwise::privacy::LogIt(&fault)
        );
        self.faults.push(fault);
    }

    pub fn set_pipeline(&mut self, pipeline: &PipelineState) {
        if pipeline.0.device_id() != self.device_id {
            self.fault(EncodingFault::ForeignPipeline(
                pipeline.function_name().to_string(),
            ));
            return;
        }
        self.pipeline = Some(pipeline.0.clone());
        self.pass
            .commands
            .push(Command::SetPipeline(pipeline.0.clone()));
    }

    /**
    Binds `buffer`, starting `offset` bytes in, at `index`. The kernel sees the bytes from
    `offset` to the end of the buffer.

    `offset` must be a multiple of [crate::Device::min_buffer_offset_alignment] (256 on most
    adapters) and leave at least one byte. Otherwise the dispatch that uses the binding faults.
    */
    pub fn set_buffer(&mut self, buffer: &Buffer, offset: usize, index: u32) {
        if buffer.0.device_id() != self.device_id {
            self.fault(EncodingFault::ForeignBuffer(index));
            return;
        }
        let length = buffer.length();
        if offset > length {
            self.fault(EncodingFault::OffsetOutOfRange {
                index,
                offset,
                length,
            });
            return;
        }
        self.bound.insert(index, Bound::Buffer { offset, length });
        self.pass.commands.push(Command::SetBuffer {
            index,
            buffer: buffer.0.clone(),
            offset: offset as u64,
        });
    }

    /// Binds a copy of `bytes` at `index`. The copy is taken now.
    pub fn set_bytes(&mut self, bytes: &[u8], index: u32) {
        if bytes.len() > MAX_BYTES_LENGTH {
            self.fault(EncodingFault::BytesTooLong {
                index,
                length: bytes.len(),
            });
            return;
        }
        self.bound.insert(index, Bound::Bytes);
        self.pass.commands.push(Command::SetBytes {
            index,
            bytes: padded(bytes),
        });
    }

    /**
    Dispatches a grid of `width` x `height` x `depth` threads.

    The grid is divided into threadgroups of the pipeline's threadgroup size, rounding up, so
    kernels should bounds-check their invocation id. A grid with a zero dimension records nothing.
    */
    pub fn dispatch(&mut self, width: u32, height: u32, depth: u32) {
        let Some(size) = self.pipeline.as_ref().map(|p| p.threadgroup_size()) else {
            self.fault(EncodingFault::NoPipeline);
            return;
        };
        let [x, y, z] = size.threadgroups_for([width, height, depth]);
        self.dispatch_threadgroups(x, y, z);
    }

    /// Dispatches an explicit number of threadgroups.
    pub fn dispatch_threadgroups(&mut self, x: u32, y: u32, z: u32) {
        let Some(pipeline) = self.pipeline.clone() else {
            self.fault(EncodingFault::NoPipeline);
            return;
        };
        let threadgroups = [x, y, z];
        if threadgroups.contains(&0) {
            logwise::trace_sync!(
                "skipping empty dispatch {threadgroups}",
                threadgroups = logwise::privacy::LogIt(&threadgroups)
            );
            return;
        }
        if threadgroups.iter().any(|&n| n > self.max_threadgroups) {
            self.fault(EncodingFault::TooManyThreadgroups {
                threadgroups,
                max: self.max_threadgroups,
            });
            return;
        }
        let faults = binding_faults(
            pipeline.function_name(),
            pipeline.bindings(),
            &self.bound,
            self.alignment,
        );
        if !faults.is_empty() {
            for fault in faults {
                self.fault(fault);
            }
            return;
        }
        self.pass.commands.push(Command::Dispatch { threadgroups });
    }

    /// Finishes recording and hands the work to the command buffer.
    pub fn end_encoding(mut self) {
        self.ended = true;
    }

    /// The command buffer this encoder records into.
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }
}

impl Drop for ComputeEncoder {
    fn drop(&mut self) {
        if !self.ended {
            self.fault(EncodingFault::NotEnded);
        }
        let pass = std::mem::take(&mut self.pass);
        let faults = std::mem::take(&mut self.faults);
        self.command_buffer.end_encoder(pass, faults);
    }
}
