//! Process-visible counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for an adapter instance.
///
/// Updates happen on the reactor thread only; reads may come from any thread
/// and observe eventually consistent values.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    streams: Arc<AtomicU64>,
    routes: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
}

impl Counters {
    /// Creates a fresh set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open logical streams.
    pub fn streams(&self) -> u64 {
        self.streams.load(Ordering::Relaxed)
    }

    /// Number of currently registered routes.
    pub fn routes(&self) -> u64 {
        self.routes.load(Ordering::Relaxed)
    }

    /// Monotonic count of slot-acquisition failures on the write path.
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub(crate) fn stream_opened(&self) {
        self.streams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_closed(&self) {
        self.streams.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn route_added(&self) {
        self.routes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn route_removed(&self) {
        self.routes.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }
}
