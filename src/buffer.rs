// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU memory regions and their CPU visibility rules.

A [Buffer] has a fixed length and a fixed [StorageMode]. The storage mode decides whether the
CPU can see the buffer at all, and if so, what the CPU must do before the GPU consumes its
writes:

| Mode                      | `contents()` | CPU writes reach the GPU             |
|---------------------------|--------------|--------------------------------------|
| [StorageMode::Shared]     | non-null     | automatically, at commit             |
| [StorageMode::Managed]    | non-null     | only ranges declared with `mark_modified` |
| [StorageMode::Private]    | null         | never                                |
| [StorageMode::Memoryless] | null         | never; contents don't persist        |

GPU writes to a CPU-visible buffer are visible to the CPU once the command buffer that made
them is terminal.
*/
use crate::imp;
use std::ptr::NonNull;
use std::sync::Arc;

/// How a buffer's memory is shared between the CPU and GPU.
///
/// The discriminants are the numeric codes used at the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StorageMode {
    /// CPU-GPU coherent memory.
    Shared = 0,
    /// CPU-visible memory the CPU must explicitly flush with [Buffer::mark_modified].
    Managed = 1,
    /// GPU-only memory.
    Private = 2,
    /// GPU-only transient scratch, cleared at the start of every command buffer using it.
    Memoryless = 3,
}

impl StorageMode {
    pub const fn is_cpu_visible(self) -> bool {
        matches!(self, StorageMode::Shared | StorageMode::Managed)
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            StorageMode::Shared => "kq shared buffer",
            StorageMode::Managed => "kq managed buffer",
            StorageMode::Private => "kq private buffer",
            StorageMode::Memoryless => "kq memoryless buffer",
        }
    }
}

/// A numeric storage mode that names none of the four modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown storage mode {0}")]
pub struct UnknownStorageMode(pub u32);

impl TryFrom<u32> for StorageMode {
    type Error = UnknownStorageMode;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StorageMode::Shared),
            1 => Ok(StorageMode::Managed),
            2 => Ok(StorageMode::Private),
            3 => Ok(StorageMode::Memoryless),
            other => Err(UnknownStorageMode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferAccessError {
    #[error("buffer with storage mode {0:?} is not visible to the CPU")]
    NotCpuVisible(StorageMode),
    #[error("range {offset}..{end} is outside a buffer of {length} bytes")]
    OutOfBounds { offset: usize, end: usize, length: usize },
}

/**
A region of GPU memory.

Buffers are cheap to clone; clones refer to the same memory. The memory is released when the
last clone (and the last command buffer using it) goes away.
*/
#[derive(Debug, Clone)]
pub struct Buffer(pub(crate) Arc<imp::Buffer>);

impl Buffer {
    /// The length requested at creation.
    pub fn length(&self) -> usize {
        self.0.length()
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.0.mode()
    }

    /**
    A pointer to the CPU view of the buffer, or `None` for GPU-only storage modes.

    The pointer stays valid for as long as any clone of this buffer is alive. Reading or
    writing through it while a command buffer using the buffer is in flight is a data race;
    the caller must serialize against command buffer completion.
    */
    pub fn contents(&self) -> Option<NonNull<u8>> {
        self.0.contents()
    }

    /**
    Declares that the CPU modified `length` bytes at `offset`.

    Required for [StorageMode::Managed] before the buffer is consumed by GPU work.
    A no-op for [StorageMode::Shared]. Logged and ignored for GPU-only modes.
    */
    pub fn mark_modified(&self, offset: usize, length: usize) {
        self.0.mark_modified(offset, length)
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), BufferAccessError> {
        let mode = self.storage_mode();
        if !mode.is_cpu_visible() {
            return Err(BufferAccessError::NotCpuVisible(mode));
        }
        let length = self.length();
        match offset.checked_add(len) {
            Some(end) if end <= length => Ok(()),
            _ => Err(BufferAccessError::OutOfBounds {
                offset,
                end: offset.saturating_add(len),
                length,
            }),
        }
    }

    /// Copies `bytes` into the buffer at `offset`, marking the range modified.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), BufferAccessError> {
        self.check(offset, bytes.len())?;
        self.0
            .with_contents_mut(|c| c[offset..offset + bytes.len()].copy_from_slice(bytes));
        self.mark_modified(offset, bytes.len());
        Ok(())
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, BufferAccessError> {
        self.check(offset, len)?;
        Ok(self
            .0
            .with_contents(|c| c[offset..offset + len].to_vec())
            .unwrap_or_default())
    }

    /// The whole CPU view of the buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, BufferAccessError> {
        self.read(0, self.length())
    }
}
