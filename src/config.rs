//! Adapter tuning knobs

/// Tuning parameters for a [TcpAdapter](crate::adapter::TcpAdapter) instance.
///
/// The defaults mirror the hard limits of the frame surface: a DATA frame
/// carries at most 65535 payload bytes, so the read buffer and the initial
/// write credit both default to that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConfig {
    /// Initial credit granted to a downstream producer when its write stream connects.
    pub window_bytes: u32,
    /// Capacity of the per-reactor read buffer, and thus the largest single DATA frame
    /// a read stream emits.
    pub read_buffer_size: usize,
    /// Number of slots in the shared partial-write pool.
    pub slot_count: usize,
    /// Capacity of each partial-write slot.
    pub slot_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            window_bytes: 65535,
            read_buffer_size: 65535,
            slot_count: 16,
            slot_size: 65536,
        }
    }
}

impl TcpConfig {
    /// Sets the initial write-side credit.
    pub fn with_window_bytes(mut self, window_bytes: u32) -> Self {
        self.window_bytes = window_bytes;
        self
    }

    /// Sets the read buffer capacity.
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    /// Sets the number of partial-write slots.
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Sets the capacity of each partial-write slot.
    pub fn with_slot_size(mut self, slot_size: usize) -> Self {
        self.slot_size = slot_size;
        self
    }
}
