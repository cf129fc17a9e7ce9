//! Shared pool of fixed-size slots for parked partial writes

#[cfg(test)]
mod buffer_test;

/// Index of a slot inside a [SlotPool] arena.
pub type SlotId = usize;

/// A fixed-size slot arena with a free list.
///
/// Slots hold bytes of a DATA frame that could not be fully written to a
/// socket. A slot is exclusively owned by one write stream while held and is
/// returned deterministically on drain, reset, or stream teardown. Slot ids
/// are arena indices, never pointers.
pub struct SlotPool {
    slot_size: usize,
    slab: Vec<u8>,
    free: Vec<SlotId>,
}

impl SlotPool {
    /// Creates a pool of `slot_count` slots, each `slot_size` bytes.
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        Self {
            slot_size,
            slab: vec![0u8; slot_count * slot_size],
            free: (0..slot_count).rev().collect(),
        }
    }

    /// Capacity of a single slot.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots currently available.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Takes a slot from the free list, or `None` when the pool is dry.
    pub fn acquire(&mut self) -> Option<SlotId> {
        self.free.pop()
    }

    /// Returns a slot to the free list.
    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(!self.free.contains(&slot));
        self.free.push(slot);
    }

    /// Borrows the bytes of `slot`.
    pub fn slot(&self, slot: SlotId) -> &[u8] {
        let at = slot * self.slot_size;
        &self.slab[at..at + self.slot_size]
    }

    /// Copies `data` into `slot` at `offset`. Returns false when it does not fit.
    pub fn write(&mut self, slot: SlotId, offset: usize, data: &[u8]) -> bool {
        if offset + data.len() > self.slot_size {
            return false;
        }
        let at = slot * self.slot_size + offset;
        self.slab[at..at + data.len()].copy_from_slice(data);
        true
    }
}
