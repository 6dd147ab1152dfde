// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! Buffers for the wgpu backend.
//!
//! wgpu has no persistent CPU mappings, so the CPU-visible storage modes are built from two
//! allocations:
//!
//! 1. A GPU buffer that every mode owns, usable as storage, uniform, copy source and copy
//!    destination.
//! 2. A CPU *shadow* with a stable address for [StorageMode::Shared] and
//!    [StorageMode::Managed]. This is what `contents()` points into.
//!
//! The shadow and the GPU buffer meet at two points in a command buffer's life:
//!
//! - **Upload**, when the command buffer is committed. Shared buffers upload whatever differs
//!   from the last synchronized copy, Managed buffers upload only the ranges the CPU declared
//!   with `mark_modified`.
//! - **Readback**, when the command buffer wrote to the buffer. A copy into a staging buffer
//!   is recorded after the passes, and the staging buffer lands in the shadow before the
//!   command buffer is reported terminal.
//!
//! Memoryless buffers are cleared when a command buffer that uses them starts, so nothing
//! leaks from one command buffer to the next.

use super::{BoundDevice, Error};
use crate::buffer::StorageMode;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};
use wgpu::{BufferDescriptor, BufferUsages, COPY_BUFFER_ALIGNMENT};

/// Bytes actually allocated for a buffer of `length` bytes.
pub(crate) fn allocated_size(length: usize) -> u64 {
    let aligned = (length as u64 + COPY_BUFFER_ALIGNMENT - 1) & !(COPY_BUFFER_ALIGNMENT - 1);
    aligned.max(COPY_BUFFER_ALIGNMENT)
}

/// Sorts, merges and aligns dirty ranges so each one is a legal `write_buffer` region.
pub(crate) fn coalesce(mut ranges: Vec<Range<u64>>, limit: u64) -> Vec<Range<u64>> {
    for r in &mut ranges {
        r.start &= !(COPY_BUFFER_ALIGNMENT - 1);
        r.end = ((r.end + COPY_BUFFER_ALIGNMENT - 1) & !(COPY_BUFFER_ALIGNMENT - 1)).min(limit);
    }
    ranges.retain(|r| r.start < r.end);
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => merged.push(r),
        }
    }
    merged
}

/// Word-aligned ranges where `current` differs from `synced`.
pub(crate) fn changed_ranges(current: &[u8], synced: &[u8]) -> Vec<Range<usize>> {
    let word = COPY_BUFFER_ALIGNMENT as usize;
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (i, (a, b)) in current.chunks(word).zip(synced.chunks(word)).enumerate() {
        if a == b {
            continue;
        }
        let start = i * word;
        let end = start + a.len();
        match ranges.last_mut() {
            Some(last) if last.end == start => last.end = end,
            _ => ranges.push(start..end),
        }
    }
    ranges
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A zeroed allocation of `len` bytes, or an error if the allocator can't provide one.
fn zeroed(len: usize) -> Result<Box<[u8]>, Error> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len).map_err(|e| {
        Error::Unsupported(format!("can't allocate {len} bytes of CPU memory: {e}"))
    })?;
    bytes.resize(len, 0);
    Ok(bytes.into_boxed_slice())
}

/**
CPU copy of a buffer's contents whose address never changes.

The allocation is held as a raw pointer from the moment it's created, so the pointer handed
out by `contents()` and the slices this crate builds under `mutex` all derive from the same
place. It is freed on drop.
*/
struct Shadow {
    bytes: NonNull<[u8]>,
    mutex: Mutex<()>,
}

// Access from this crate is serialized by `mutex`; raw pointer users follow the storage-mode
// contract instead.
unsafe impl Send for Shadow {}
unsafe impl Sync for Shadow {}

impl Shadow {
    fn new(len: usize) -> Result<Self, Error> {
        let boxed = zeroed(len)?;
        Ok(Shadow {
            //safe because Box::into_raw is never null
            bytes: unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) },
            mutex: Mutex::new(()),
        })
    }

    fn ptr(&self) -> NonNull<u8> {
        self.bytes.cast()
    }

    fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _guard = lock(&self.mutex);
        //safe because the allocation lives as long as self and the mutex excludes writers
        f(unsafe { std::slice::from_raw_parts(self.ptr().as_ptr(), self.bytes.len()) })
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let _guard = lock(&self.mutex);
        //safe because the allocation lives as long as self and the mutex excludes other users
        f(unsafe { std::slice::from_raw_parts_mut(self.ptr().as_ptr(), self.bytes.len()) })
    }
}

impl Drop for Shadow {
    fn drop(&mut self) {
        //safe because bytes came from Box::into_raw and is dropped exactly once
        drop(unsafe { Box::from_raw(self.bytes.as_ptr()) });
    }
}

impl std::fmt::Debug for Shadow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shadow").field("ptr", &self.ptr()).finish()
    }
}

#[derive(Debug)]
pub(crate) struct Buffer {
    device: BoundDevice,
    gpu: wgpu::Buffer,
    length: usize,
    allocated: u64,
    mode: StorageMode,
    shadow: Option<Shadow>,
    /// Shared only: the contents as of the last upload or readback
    synced: Option<Mutex<Box<[u8]>>>,
    dirty: Mutex<Vec<Range<u64>>>,
}

impl Buffer {
    pub(crate) fn new(device: &BoundDevice, length: usize, mode: StorageMode) -> Result<Self, Error> {
        let allocated = allocated_size(length);
        let max = device.limits().max_buffer_size;
        if allocated > max {
            return Err(Error::Unsupported(format!(
                "buffer of {length} bytes exceeds the device maximum of {max} bytes"
            )));
        }
        let shadow = if mode.is_cpu_visible() {
            Some(Shadow::new(allocated as usize)?)
        } else {
            None
        };
        let synced = match mode {
            StorageMode::Shared => Some(Mutex::new(zeroed(allocated as usize)?)),
            _ => None,
        };
        let usage = BufferUsages::STORAGE
            | BufferUsages::UNIFORM
            | BufferUsages::COPY_DST
            | BufferUsages::COPY_SRC;
        let (gpu, error) = device.scoped(|d| {
            d.create_buffer(&BufferDescriptor {
                label: Some(mode.label()),
                size: allocated,
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = error {
            return Err(e.into());
        }
        logwise::trace_sync!(
            "allocated {allocated} bytes for a buffer of {length}",
            allocated = allocated,
            length = length
        );
        Ok(Buffer {
            device: device.clone(),
            gpu,
            length,
            allocated,
            mode,
            shadow,
            synced,
            dirty: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device.id()
    }

    pub(crate) fn length(&self) -> usize {
        self.length
    }

    pub(crate) fn mode(&self) -> StorageMode {
        self.mode
    }

    pub(crate) fn gpu(&self) -> &wgpu::Buffer {
        &self.gpu
    }

    pub(crate) fn contents(&self) -> Option<NonNull<u8>> {
        self.shadow.as_ref().map(|s| s.ptr())
    }

    /// Runs `f` over the first `length` bytes of the shadow, if there is one.
    pub(crate) fn with_contents<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let length = self.length;
        self.shadow.as_ref().map(|s| s.with(|b| f(&b[..length])))
    }

    pub(crate) fn with_contents_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let length = self.length;
        self.shadow.as_ref().map(|s| s.with_mut(|b| f(&mut b[..length])))
    }

    pub(crate) fn mark_modified(&self, offset: usize, len: usize) {
        match self.mode {
            StorageMode::Shared => {}
            StorageMode::Managed => {
                let end = offset.saturating_add(len).min(self.length);
                if offset >= end {
                    logwise::warn_sync!(
                        "mark_modified range starting at {offset} is empty or outside a buffer of {length} bytes",
                        offset = offset,
                        length = self.length
                    );
                    return;
                }
                lock(&self.dirty).push(offset as u64..end as u64);
            }
            StorageMode::Private | StorageMode::Memoryless => {
                logwise::warn_sync!(
                    "mark_modified on a buffer the CPU can't see ({mode})",
                    mode = logwise::privacy::LogIt(&self.mode)
                );
            }
        }
    }

    /// Makes CPU writes visible to work submitted after this call.
    pub(crate) fn upload(&self) {
        let Some(shadow) = &self.shadow else {
            return;
        };
        let queue = self.device.queue();
        match self.mode {
            StorageMode::Shared => {
                let Some(synced) = &self.synced else {
                    return;
                };
                let mut synced = lock(synced);
                shadow.with(|b| {
                    for r in changed_ranges(b, &synced) {
                        queue.write_buffer(&self.gpu, r.start as u64, &b[r.clone()]);
                        synced[r.clone()].copy_from_slice(&b[r]);
                    }
                });
            }
            StorageMode::Managed => {
                let ranges = coalesce(std::mem::take(&mut *lock(&self.dirty)), self.allocated);
                shadow.with(|b| {
                    for r in ranges {
                        queue.write_buffer(&self.gpu, r.start, &b[r.start as usize..r.end as usize]);
                    }
                });
            }
            StorageMode::Private | StorageMode::Memoryless => {}
        }
    }

    /// Commands that run before any pass of a command buffer using this buffer.
    pub(crate) fn prepare(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.mode == StorageMode::Memoryless {
            encoder.clear_buffer(&self.gpu, 0, None);
        }
    }

    /// Records a copy of the GPU contents into a fresh staging buffer.
    pub(crate) fn record_readback(&self, encoder: &mut wgpu::CommandEncoder) -> Option<wgpu::Buffer> {
        self.shadow.as_ref()?;
        let staging = self.device.device().create_buffer(&BufferDescriptor {
            label: Some("kq readback"),
            size: self.allocated,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&self.gpu, 0, &staging, 0, self.allocated);
        Some(staging)
    }

    /// Copies a mapped staging buffer into the shadow and unmaps it.
    pub(crate) fn land_readback(&self, staging: &wgpu::Buffer) {
        if let Some(shadow) = &self.shadow {
            let data = staging.slice(..).get_mapped_range();
            shadow.with_mut(|b| {
                b.copy_from_slice(&data);
                if let Some(synced) = &self.synced {
                    lock(synced).copy_from_slice(&data);
                }
            });
            drop(data);
        }
        staging.unmap();
    }
}
