// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Arena of objects handed across the C boundary.

A handle is a `u64`:

```text
 63      56 55             32 31               0
+----------+-----------------+------------------+
|   kind   |   generation    |    slot + 1      |
+----------+-----------------+------------------+
```

Releasing a handle bumps its slot's generation, so a stale handle, a handle of the wrong kind
or a made-up number fails lookup instead of reaching freed memory. `0` is never issued.
*/
use crate::buffer::Buffer;
use crate::command_buffer::CommandBuffer;
use crate::command_queue::CommandQueue;
use crate::device::Device;
use crate::encoder::ComputeEncoder;
use crate::pipeline::PipelineState;
use crate::shader::{Function, Library};
use std::sync::{Mutex, MutexGuard};

const GENERATION_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Kind {
    Device = 1,
    CommandQueue = 2,
    Buffer = 3,
    Library = 4,
    Function = 5,
    Pipeline = 6,
    CommandBuffer = 7,
    Encoder = 8,
}

#[derive(Debug)]
pub(crate) enum Object {
    Device(Device),
    CommandQueue(CommandQueue),
    Buffer(Buffer),
    Library(Library),
    Function(Function),
    Pipeline(PipelineState),
    CommandBuffer(CommandBuffer),
    /// `None` once the encoder has been ended.
    Encoder(Option<ComputeEncoder>),
}

impl Object {
    fn kind(&self) -> Kind {
        match self {
            Object::Device(_) => Kind::Device,
            Object::CommandQueue(_) => Kind::CommandQueue,
            Object::Buffer(_) => Kind::Buffer,
            Object::Library(_) => Kind::Library,
            Object::Function(_) => Kind::Function,
            Object::Pipeline(_) => Kind::Pipeline,
            Object::CommandBuffer(_) => Kind::CommandBuffer,
            Object::Encoder(_) => Kind::Encoder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decoded {
    kind: u8,
    generation: u32,
    slot: usize,
}

fn encode(kind: Kind, generation: u32, slot: usize) -> u64 {
    ((kind as u64) << 56) | (((generation & GENERATION_MASK) as u64) << 32) | (slot as u64 + 1)
}

fn decode(handle: u64) -> Option<Decoded> {
    let low = (handle & 0xFFFF_FFFF) as usize;
    if low == 0 {
        return None;
    }
    Some(Decoded {
        kind: (handle >> 56) as u8,
        generation: ((handle >> 32) as u32) & GENERATION_MASK,
        slot: low - 1,
    })
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<Object>,
}

#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl HandleTable {
    pub(crate) const fn new() -> Self {
        HandleTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, object: Object) -> u64 {
        let kind = object.kind();
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let entry = &mut self.slots[slot];
        entry.object = Some(object);
        encode(kind, entry.generation, slot)
    }

    fn find(&mut self, handle: u64) -> Option<&mut Slot> {
        let decoded = decode(handle)?;
        let slot = self.slots.get_mut(decoded.slot)?;
        let object = slot.object.as_ref()?;
        if slot.generation & GENERATION_MASK != decoded.generation
            || object.kind() as u8 != decoded.kind
        {
            return None;
        }
        Some(slot)
    }

    pub(crate) fn get_mut(&mut self, handle: u64) -> Option<&mut Object> {
        self.find(handle)?.object.as_mut()
    }

    /// Invalidates `handle` and hands back its object, to be dropped outside the table lock.
    ///
    /// Fails unless `handle` is a live handle of `kind`.
    pub(crate) fn remove(&mut self, handle: u64, kind: Kind) -> Option<Object> {
        let decoded = decode(handle)?;
        if decoded.kind != kind as u8 {
            return None;
        }
        let slot_index = decoded.slot;
        let slot = self.find(handle)?;
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(slot_index);
        object
    }

    /// Invalidates every handle and hands back all objects.
    pub(crate) fn drain(&mut self) -> Vec<Object> {
        let mut objects = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(object) = slot.object.take() {
                slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
                self.free.push(index);
                objects.push(object);
            }
        }
        objects
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }
}

static TABLE: Mutex<HandleTable> = Mutex::new(HandleTable::new());

/// The process-wide table.
pub(crate) fn table() -> MutexGuard<'static, HandleTable> {
    TABLE.lock().unwrap_or_else(|e| e.into_inner())
}
