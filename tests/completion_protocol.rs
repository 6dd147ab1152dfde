// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The command buffer lifecycle as seen from callers.

use kernels_and_queues::{CommandQueue, Device, PipelineState, Status, StorageMode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use test_executors::async_test;

const INCREMENT: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn increment(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + 1u;
    }
}
"#;

struct Fixture {
    device: Device,
    queue: CommandQueue,
    pipeline: PipelineState,
}

fn fixture() -> Option<Fixture> {
    let Some(device) = Device::create_default() else {
        println!("skipping: no GPU adapter available");
        return None;
    };
    let library = device.new_library(INCREMENT).unwrap();
    let pipeline = device
        .new_compute_pipeline(&library.function("increment").unwrap())
        .unwrap();
    let queue = device.new_command_queue();
    Some(Fixture {
        device,
        queue,
        pipeline,
    })
}

impl Fixture {
    fn command_buffer(&self, buffer: &kernels_and_queues::Buffer) -> kernels_and_queues::CommandBuffer {
        let command_buffer = self.queue.command_buffer();
        let mut encoder = command_buffer.compute_encoder().unwrap();
        encoder.set_pipeline(&self.pipeline);
        encoder.set_buffer(buffer, 0, 0);
        encoder.dispatch((buffer.length() / 4) as u32, 1, 1);
        encoder.end_encoding();
        command_buffer
    }
}

#[test]
fn callback_fires_once_and_agrees_with_wait() {
    let Some(f) = fixture() else { return };
    let buffer = f.device.new_buffer(1024, StorageMode::Shared).unwrap();
    let command_buffer = f.command_buffer(&buffer);
    let calls = Arc::new(AtomicU32::new(0));
    let (sender, receiver) = mpsc::channel();
    let move_calls = calls.clone();
    command_buffer.commit_with_callback(move |status| {
        move_calls.fetch_add(1, Ordering::SeqCst);
        sender.send(status).unwrap();
    });

    let waiter_buffer = command_buffer.clone();
    let waited = std::thread::spawn(move || waiter_buffer.wait_until_completed())
        .join()
        .unwrap();
    let called = receiver.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(called, waited);
    assert_eq!(called, Status::Completed);

    //a second commit changes nothing
    command_buffer.commit();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(command_buffer.status(), Status::Completed);
}

#[test]
fn status_is_monotonic() {
    let Some(f) = fixture() else { return };
    let buffer = f.device.new_buffer(1 << 20, StorageMode::Shared).unwrap();
    let command_buffer = f.command_buffer(&buffer);
    assert_eq!(command_buffer.status(), Status::NotCommitted);
    command_buffer.commit();
    let mut last = command_buffer.status();
    assert!(last >= Status::Committed);
    while !last.is_terminal() {
        let now = command_buffer.status();
        assert!(now >= last, "{now:?} after {last:?}");
        last = now;
    }
    assert_eq!(command_buffer.wait_until_completed(), last);
}

#[test]
fn same_queue_completes_in_commit_order() {
    let Some(f) = fixture() else { return };
    let buffer = f.device.new_buffer(4096, StorageMode::Shared).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut last = None;
    for i in 0..8 {
        let command_buffer = f.command_buffer(&buffer);
        let move_order = order.clone();
        command_buffer.commit_with_callback(move |status| {
            move_order.lock().unwrap().push((i, status));
        });
        last = Some(command_buffer);
    }
    assert_eq!(last.unwrap().wait_until_completed(), Status::Completed);
    let order = order.lock().unwrap().clone();
    assert_eq!(
        order,
        (0..8).map(|i| (i, Status::Completed)).collect::<Vec<_>>()
    );
    let words = buffer.to_vec().unwrap();
    assert_eq!(u32::from_le_bytes([words[0], words[1], words[2], words[3]]), 8);
}

#[test]
fn wait_without_commit_returns_immediately() {
    let Some(f) = fixture() else { return };
    let command_buffer = f.queue.command_buffer();
    assert_eq!(command_buffer.wait_until_completed(), Status::NotCommitted);
}

#[test]
fn one_encoder_at_a_time() {
    let Some(f) = fixture() else { return };
    let command_buffer = f.queue.command_buffer();
    let encoder = command_buffer.compute_encoder().unwrap();
    assert!(command_buffer.compute_encoder().is_none());
    encoder.end_encoding();
    let second = command_buffer.compute_encoder().unwrap();
    second.end_encoding();
    command_buffer.commit();
    assert!(command_buffer.compute_encoder().is_none());
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);
}

#[test]
fn malformed_encoding_errors() {
    let Some(f) = fixture() else { return };
    let buffer = f.device.new_buffer(64, StorageMode::Shared).unwrap();

    //missing binding
    let command_buffer = f.queue.command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&f.pipeline);
    encoder.dispatch(16, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Error);

    //dispatch without a pipeline
    let command_buffer = f.queue.command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_buffer(&buffer, 0, 0);
    encoder.dispatch(16, 1, 1);
    encoder.end_encoding();
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Error);

    //encoder dropped without end_encoding
    let command_buffer = f.command_buffer(&buffer);
    drop(command_buffer.compute_encoder().unwrap());
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Error);

    //committed with an encoder open
    let command_buffer = f.queue.command_buffer();
    let encoder = command_buffer.compute_encoder().unwrap();
    command_buffer.commit();
    encoder.end_encoding();
    assert_eq!(command_buffer.wait_until_completed(), Status::Error);
    assert!(command_buffer.status().check().is_err());

    //faulted command buffers are never scheduled
    let command_buffer = f.queue.command_buffer();
    let mut encoder = command_buffer.compute_encoder().unwrap();
    encoder.set_pipeline(&f.pipeline);
    encoder.dispatch(16, 1, 1);
    encoder.end_encoding();
    let (sender, receiver) = mpsc::channel();
    command_buffer.commit_with_callback(move |status| sender.send(status).unwrap());
    let seen = command_buffer.status();
    assert!(matches!(seen, Status::Committed | Status::Error), "{seen:?}");
    assert_eq!(receiver.recv_timeout(Duration::from_secs(30)).unwrap(), Status::Error);
    assert_eq!(command_buffer.status(), Status::Error);

    //a faulted command buffer doesn't poison the queue
    let command_buffer = f.command_buffer(&buffer);
    command_buffer.commit();
    assert_eq!(command_buffer.wait_until_completed(), Status::Completed);
}

#[async_test]
async fn completed_future_resolves() {
    let Some(f) = fixture() else { return };
    let buffer = f.device.new_buffer(256, StorageMode::Shared).unwrap();
    let command_buffer = f.command_buffer(&buffer);
    let completed = command_buffer.completed();
    command_buffer.commit();
    assert_eq!(completed.await, Status::Completed);
    //after the fact, too
    assert_eq!(command_buffer.completed().await, Status::Completed);
}
