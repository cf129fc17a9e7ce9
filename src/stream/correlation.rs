//! One-shot tokens pairing an outbound BEGIN with its reply

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::{ReadStream, SharedChannel, StreamChannel};
use crate::poller::PollerKey;

/// State parked while a server-side accept waits for the downstream reply
/// BEGIN that attaches the write stream.
pub struct Correlation<C: StreamChannel> {
    /// Name of the source the accepted connection arrived from.
    pub source: String,
    /// The accepted connection.
    pub channel: SharedChannel<C>,
    /// The connection's poller key, shared with the read stream.
    pub key: Rc<PollerKey>,
    /// The read stream awaiting its correlated throttle.
    pub read_stream: Weak<RefCell<ReadStream<C>>>,
    /// Stream id of the read stream toward the target.
    pub correlated_stream_id: u64,
}

/// Registry of pending [Correlation]s, keyed by correlation id.
///
/// An entry is consumed at most once; entries whose socket closed before the
/// reply BEGIN arrived are purged by [sweep](Correlations::sweep).
pub struct Correlations<C: StreamChannel> {
    pending: HashMap<u64, Correlation<C>>,
}

impl<C: StreamChannel> Default for Correlations<C> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<C: StreamChannel> Correlations<C> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `correlation` under `correlation_id`.
    pub fn put(&mut self, correlation_id: u64, correlation: Correlation<C>) {
        self.pending.insert(correlation_id, correlation);
    }

    /// Consumes the correlation for `correlation_id`, if still pending.
    pub fn remove(&mut self, correlation_id: u64) -> Option<Correlation<C>> {
        self.pending.remove(&correlation_id)
    }

    /// Number of pending correlations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no correlations are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops correlations whose socket already closed; they can never be
    /// consumed, so they go quietly.
    pub fn sweep(&mut self) {
        self.pending
            .retain(|_, correlation| correlation.channel.borrow().is_open());
    }
}
