// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! kernels_and_queues is a small GPU compute-dispatch layer.

It exposes device discovery, buffer allocation, shader compilation, pipeline construction and
asynchronous command submission as a handful of handle types, and the same surface again as a
C ABI in [ffi].

# Object graph

```text
Device ─┬─ CommandQueue ── CommandBuffer ── ComputeEncoder
        ├─ Buffer
        ├─ Library ── Function
        └─ PipelineState (built from a Function)
```

Every handle is reference counted. Objects keep whatever they were created from alive, so
dropping a [Device] while its buffers are still in use is fine.

# Storage modes

Buffers come in four [StorageMode]s that decide whether and when the CPU sees GPU memory.
See [buffer] for the rules.

# Completion

A [CommandBuffer] moves strictly forward through [Status]. Callers can register a callback,
block, or await a future; see [command_buffer].

# Example

```no_run
use kernels_and_queues::{Device, StorageMode};

let device = Device::create_default().expect("no GPU");
let buffer = device.new_buffer(256 * 4, StorageMode::Shared).unwrap();
let library = device
    .new_library(
        "@group(0) @binding(0) var<storage, read_write> data: array<u32>;
         @compute @workgroup_size(64)
         fn double(@builtin(global_invocation_id) id: vec3<u32>) {
             if (id.x < arrayLength(&data)) { data[id.x] = data[id.x] * 2u; }
         }",
    )
    .unwrap();
let pipeline = device
    .new_compute_pipeline(&library.function("double").unwrap())
    .unwrap();

let queue = device.new_command_queue();
let command_buffer = queue.command_buffer();
let mut encoder = command_buffer.compute_encoder().unwrap();
encoder.set_pipeline(&pipeline);
encoder.set_buffer(&buffer, 0, 0);
encoder.dispatch(256, 1, 1);
encoder.end_encoding();
command_buffer.commit();
command_buffer.wait_until_completed();
```

# Backends

The only backend is [wgpu](https://wgpu.rs), so shaders are WGSL and the layer runs wherever
wgpu does: Metal, Vulkan, DX12 and GL.
*/

pub mod buffer;
pub mod command_buffer;
pub mod command_queue;
pub mod device;
pub mod encoder;
mod error;
pub mod ffi;
mod imp;
pub mod pipeline;
pub mod shader;

pub use buffer::{Buffer, BufferAccessError, StorageMode, UnknownStorageMode};
pub use command_buffer::{CommandBuffer, Status};
pub use command_queue::CommandQueue;
pub use device::{Device, DeviceError, DeviceOptions, PowerPreference};
pub use encoder::{ComputeEncoder, EncodingFault};
pub use error::Error;
pub use pipeline::{PipelineBuildError, PipelineState, ThreadgroupSize};
pub use shader::{CompileError, Function, FunctionType, Library};
