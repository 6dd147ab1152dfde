// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Kernels that actually run, checked against their results.

use kernels_and_queues::{Buffer, Device, PipelineState, Status, StorageMode};

const DOUBLE_BYTES: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16)
fn double_bytes(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        // doubles each of the four bytes, mod 256
        data[id.x] = (data[id.x] << 1u) & 0xFEFEFEFEu;
    }
}
"#;

const ADD_CONSTANT: &str = r#"
struct Params { amount: u32, _pad0: u32, _pad1: u32, _pad2: u32 }

@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(8, 1, 1)
fn add_constant(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + params.amount;
    }
}
"#;

const SEVERAL_ENTRY_POINTS: &str = r#"
@group(0) @binding(0) var<storage, read_write> first_data: array<u32>;
@group(0) @binding(1) var<storage, read_write> second_data: array<u32>;
@group(1) @binding(0) var picture: texture_2d<f32>;

@compute @workgroup_size(4)
fn first(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&first_data)) {
        first_data[id.x] = id.x + 100u;
    }
}

@compute @workgroup_size(4)
fn second(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&second_data)) {
        second_data[id.x] = id.x + 200u;
    }
}

@fragment
fn shade(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(picture, vec2<i32>(position.xy), 0);
}
"#;

const STAMP_LENGTH: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16)
fn stamp_length(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = arrayLength(&data);
    if (id.x < n) {
        data[id.x] = n;
    }
}
"#;

fn device() -> Option<Device> {
    let device = Device::create_default();
    if device.is_none() {
        println!("skipping: no GPU adapter available");
    }
    device
}

#[test]
fn doubles_each_byte() {
    let Some(device) = device() else { return };
    println!("running on {}", device.name());
    let buffer = device.new_buffer(256, StorageMode::Shared).unwrap();
    let pattern: Vec<u8> = (0..=255u8).collect();
    buffer.write(0, &pattern).unwrap();

    let library = device.new_library(DOUBLE_BYTES).unwrap();
    let function = library.function("double_bytes").unwrap();
    let pipeline = device.new_compute_pipeline(&function).unwrap();
    assert_eq!(pipeline.threadgroup_size().width, 16);

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&pipeline);
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(256, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);

    let result = buffer.to_vec().unwrap();
    for (i, byte) in result.iter().enumerate() {
        assert_eq!(*byte, ((2 * i) % 256) as u8, "byte {i}");
    }
}

#[test]
fn immediate_bytes_reach_the_kernel() {
    let Some(device) = device() else { return };
    let buffer = device.new_buffer(10 * 4, StorageMode::Shared).unwrap();
    let input: Vec<u8> = (0..10u32).flat_map(|v| v.to_le_bytes()).collect();
    buffer.write(0, &input).unwrap();

    let library = device.new_library(ADD_CONSTANT).unwrap();
    let pipeline = device
        .new_compute_pipeline(&library.function("add_constant").unwrap())
        .unwrap();
    let mut params = [0u8; 16];
    params[..4].copy_from_slice(&100u32.to_le_bytes());

    let command_buffer = device.new_command_queue().command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&pipeline);
    encoder.set_bytes(&params, 1);
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(10, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);

    let result: Vec<u32> = buffer
        .to_vec()
        .unwrap()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(result, (100..110).collect::<Vec<u32>>());
}

#[test]
fn pipeline_from_another_device_errors() {
    let Some(first) = device() else { return };
    let Some(second) = device() else { return };
    assert_ne!(first, second);

    let library = first.new_library(DOUBLE_BYTES).unwrap();
    let foreign = first
        .new_compute_pipeline(&library.function("double_bytes").unwrap())
        .unwrap();
    let buffer = second.new_buffer(64, StorageMode::Shared).unwrap();

    let command_buffer = second.new_command_queue().command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&foreign);
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(16, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Error);
}

#[test]
fn zero_sized_dispatch_completes() {
    let Some(device) = device() else { return };
    let buffer = device.new_buffer(64, StorageMode::Shared).unwrap();
    buffer.write(0, &[3; 64]).unwrap();
    let library = device.new_library(DOUBLE_BYTES).unwrap();
    let pipeline = device
        .new_compute_pipeline(&library.function("double_bytes").unwrap())
        .unwrap();

    let command_buffer = device.new_command_queue().command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&pipeline);
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(0, 1, 1);
    encoder.dispatch(16, 0, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);
    assert_eq!(buffer.to_vec().unwrap(), vec![3; 64]);
}

#[test]
fn objects_outlive_their_device_handle() {
    let Some(device) = device() else { return };
    let buffer = device.new_buffer(16, StorageMode::Shared).unwrap();
    buffer.write(0, &[1; 16]).unwrap();
    let library = device.new_library(DOUBLE_BYTES).unwrap();
    let function = library.function("double_bytes").unwrap();
    let pipeline = device.new_compute_pipeline(&function).unwrap();
    let queue = device.new_command_queue();
    drop(library);
    drop(device);

    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&pipeline);
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(4, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);
    assert_eq!(buffer.to_vec().unwrap(), vec![2; 16]);
    assert_eq!(function.name(), "double_bytes");
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn run_one(device: &Device, pipeline: &PipelineState, buffer: &Buffer, offset: usize, threads: u32) -> Status {
    let command_buffer = device.new_command_queue().command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(pipeline);
    encoder.set_buffer(buffer, offset, 0);
    encoder.dispatch(threads, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    command_buffer.wait_until_completed()
}

#[test]
fn kernels_only_need_their_own_bindings() {
    let Some(device) = device() else { return };
    let library = device.new_library(SEVERAL_ENTRY_POINTS).unwrap();
    let first = device
        .new_compute_pipeline(&library.function("first").unwrap())
        .unwrap();
    let second = device
        .new_compute_pipeline(&library.function("second").unwrap())
        .unwrap();

    let buffer = device.new_buffer(8 * 4, StorageMode::Shared).unwrap();
    assert_eq!(run_one(&device, &first, &buffer, 0, 8), Status::Completed);
    assert_eq!(words(&buffer.to_vec().unwrap()), (100..108).collect::<Vec<u32>>());

    //second reads binding 1, so the same encoding leaves it unbound
    assert_eq!(run_one(&device, &second, &buffer, 0, 8), Status::Error);

    let command_buffer = device.new_command_queue().command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&second);
    encoder.set_buffer(&buffer, 0, 1);
    encoder.dispatch(8, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);
    assert_eq!(words(&buffer.to_vec().unwrap()), (200..208).collect::<Vec<u32>>());
}

#[test]
fn kernel_sees_the_buffer_past_its_offset() {
    let Some(device) = device() else { return };
    let offset = device.min_buffer_offset_alignment();
    let buffer = device.new_buffer(offset + 64, StorageMode::Shared).unwrap();
    buffer.write(0, &vec![0xAB; offset + 64]).unwrap();

    let library = device.new_library(STAMP_LENGTH).unwrap();
    let pipeline = device
        .new_compute_pipeline(&library.function("stamp_length").unwrap())
        .unwrap();
    assert_eq!(run_one(&device, &pipeline, &buffer, offset, 64), Status::Completed);

    let result = buffer.to_vec().unwrap();
    assert!(result[..offset].iter().all(|b| *b == 0xAB), "bytes before the offset changed");
    assert_eq!(words(&result[offset..]), vec![16; 16]);
}

#[test]
fn unusable_offsets_error() {
    let Some(device) = device() else { return };
    let alignment = device.min_buffer_offset_alignment();
    let library = device.new_library(STAMP_LENGTH).unwrap();
    let pipeline = device
        .new_compute_pipeline(&library.function("stamp_length").unwrap())
        .unwrap();

    let buffer = device.new_buffer(alignment * 2, StorageMode::Shared).unwrap();
    if alignment > 4 {
        assert_eq!(run_one(&device, &pipeline, &buffer, 4, 16), Status::Error);
    }
    //aligned, but nothing left to bind
    let exact = device.new_buffer(alignment, StorageMode::Shared).unwrap();
    assert_eq!(run_one(&device, &pipeline, &exact, alignment, 16), Status::Error);

    let empty = device.new_buffer(0, StorageMode::Shared).unwrap();
    assert_eq!(run_one(&device, &pipeline, &empty, 0, 16), Status::Error);

    //the whole buffer still works
    assert_eq!(run_one(&device, &pipeline, &buffer, 0, 16), Status::Completed);
    let expected = (alignment * 2 / 4) as u32;
    assert_eq!(words(&buffer.to_vec().unwrap())[..16].to_vec(), vec![expected; 16]);
}
