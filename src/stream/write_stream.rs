//! Fabric-to-socket pump with partial-write recovery

use log::{trace, warn};
use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

use super::{ReadStream, SharedChannel, StreamChannel};
use crate::buffer::{SlotId, SlotPool};
use crate::counters::Counters;
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::{PollerKey, OP_WRITE};

/// Bounded spin on zero-length writes before a payload is parked in a slot.
/// Trades a few retries of the write syscall against the cost of a slot and
/// an extra reactor turn under transient congestion.
pub const WRITE_SPIN_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Connected,
    Closed,
}

/// Consumes DATA frames from a downstream producer and writes them to the
/// socket.
///
/// A payload that cannot be fully written is parked in a slot from the
/// shared pool; at most one slot is ever held, and later payloads append to
/// it. WINDOW credit for a frame is withheld until every byte of it reached
/// the socket, so the producer's view of available credit tracks what the
/// kernel actually accepted.
pub struct WriteStream<C: StreamChannel> {
    throttle: SharedFrameSink,
    stream_id: u64,
    key: Rc<PollerKey>,
    channel: SharedChannel<C>,
    pool: Rc<RefCell<SlotPool>>,
    window_bytes: u32,
    slot: Option<SlotId>,
    slot_offset: usize,
    slot_len: usize,
    uncredited: usize,
    end_deferred: bool,
    reset_deferred: bool,
    state: WriteState,
    correlated: Option<Weak<RefCell<ReadStream<C>>>>,
    counters: Counters,
}

impl<C: StreamChannel> WriteStream<C> {
    /// Creates a stream writing `stream_id`'s payloads to `channel`,
    /// crediting `throttle`.
    pub fn new(
        throttle: SharedFrameSink,
        stream_id: u64,
        key: Rc<PollerKey>,
        channel: SharedChannel<C>,
        pool: Rc<RefCell<SlotPool>>,
        window_bytes: u32,
        counters: Counters,
    ) -> Self {
        Self {
            throttle,
            stream_id,
            key,
            channel,
            pool,
            window_bytes,
            slot: None,
            slot_offset: 0,
            slot_len: 0,
            uncredited: 0,
            end_deferred: false,
            reset_deferred: false,
            state: WriteState::Connected,
            correlated: None,
            counters,
        }
    }

    /// Id of the stream from the downstream producer.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Whether the stream has closed.
    pub fn is_closed(&self) -> bool {
        self.state == WriteState::Closed
    }

    /// Whether a partial write is parked.
    pub fn has_pending(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn set_correlated(&mut self, reader: Weak<RefCell<ReadStream<C>>>) {
        self.correlated = Some(reader);
    }

    pub(crate) fn unlink(&mut self) {
        self.correlated = None;
    }

    /// Grants the producer its initial credit.
    pub fn do_connected(&mut self) {
        self.throttle.borrow_mut().accept(Frame::Window {
            stream_id: self.stream_id,
            credit: self.window_bytes as i32,
        });
    }

    /// A DATA frame from the producer.
    pub fn handle_data(&mut self, payload: &[u8]) {
        if self.state == WriteState::Closed || self.end_deferred {
            // Frames after END are a protocol violation; the pending bytes
            // still drain, the producer gets told off.
            warn!("stream {} data after end of stream", self.stream_id);
            self.throttle.borrow_mut().accept(Frame::Reset {
                stream_id: self.stream_id,
            });
            return;
        }
        if self.reset_deferred {
            return;
        }

        if let Some(slot) = self.slot {
            // One pending write at a time; later payloads queue behind it.
            let appended = self
                .pool
                .borrow_mut()
                .write(slot, self.slot_offset + self.slot_len, payload);
            if !appended {
                warn!("stream {} slot cannot hold queued payload", self.stream_id);
                self.do_write_fail();
                return;
            }
            self.slot_len += payload.len();
            self.uncredited += payload.len();
            return;
        }

        let mut written = 0usize;
        for _ in 0..WRITE_SPIN_COUNT {
            let result = {
                let mut channel = self.channel.borrow_mut();
                channel.write(payload)
            };
            match result {
                Ok(0) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Ok(bytes_written) => {
                    written = bytes_written;
                    break;
                }
                Err(e) => {
                    warn!("stream {} write error: {}", self.stream_id, e);
                    self.do_write_fail();
                    return;
                }
            }
        }

        trace!(
            "stream {} wrote {} of {} bytes",
            self.stream_id,
            written,
            payload.len()
        );
        if written == payload.len() {
            self.uncredited += written;
            self.credit();
        } else {
            self.park(&payload[written..], payload.len());
        }
    }

    /// Parks the unwritten suffix in a fresh slot and waits for OP_WRITE.
    fn park(&mut self, remainder: &[u8], frame_len: usize) {
        let acquired = self.pool.borrow_mut().acquire();
        let Some(slot) = acquired else {
            self.counters.overflow();
            warn!("stream {} slot pool exhausted", self.stream_id);
            self.do_write_fail();
            return;
        };
        if !self.pool.borrow_mut().write(slot, 0, remainder) {
            self.pool.borrow_mut().release(slot);
            warn!("stream {} payload exceeds slot capacity", self.stream_id);
            self.do_write_fail();
            return;
        }
        self.slot = Some(slot);
        self.slot_offset = 0;
        self.slot_len = remainder.len();
        self.uncredited += frame_len;
        if let Err(e) = self.key.enable(OP_WRITE) {
            warn!("stream {} enable write: {}", self.stream_id, e);
            self.do_write_fail();
        }
    }

    /// OP_WRITE readiness: drains the parked slot.
    pub fn handle_write(&mut self) -> io::Result<usize> {
        let Some(slot) = self.slot else {
            let _ = self.key.disable(OP_WRITE);
            return Ok(0);
        };

        let result = {
            let pool = self.pool.borrow();
            let pending = &pool.slot(slot)[self.slot_offset..self.slot_offset + self.slot_len];
            let mut channel = self.channel.borrow_mut();
            channel.write(pending)
        };

        match result {
            Ok(0) => Ok(0),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Ok(bytes_written) => {
                trace!(
                    "stream {} drained {} of {} pending bytes",
                    self.stream_id,
                    bytes_written,
                    self.slot_len
                );
                self.slot_offset += bytes_written;
                self.slot_len -= bytes_written;
                if self.slot_len == 0 {
                    self.release_slot();
                    let _ = self.key.disable(OP_WRITE);
                    if self.reset_deferred {
                        self.do_abort_close();
                    } else {
                        self.credit();
                        if self.end_deferred {
                            self.do_end();
                        }
                    }
                } else {
                    // Still writable until proven otherwise.
                    self.key.schedule(OP_WRITE);
                }
                Ok(bytes_written)
            }
            Err(e) => {
                warn!("stream {} drain error: {}", self.stream_id, e);
                self.do_write_fail();
                Ok(1)
            }
        }
    }

    /// An END frame from the producer; deferred while a slot drains.
    pub fn handle_end(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        if self.slot.is_some() {
            self.end_deferred = true;
            return;
        }
        self.do_end();
    }

    /// An ABORT frame from the producer: the stream dies mid-flight, so the
    /// socket goes down abortively.
    pub fn handle_abort(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        self.do_abort_close();
    }

    /// A RESET from the producer side; deferred while a slot drains.
    pub fn handle_reset(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        if self.slot.is_some() {
            self.reset_deferred = true;
            return;
        }
        self.do_abort_close();
    }

    /// Emits WINDOW for everything accepted since the last credit.
    fn credit(&mut self) {
        if self.uncredited == 0 {
            return;
        }
        let credit = self.uncredited as i32;
        self.uncredited = 0;
        self.throttle.borrow_mut().accept(Frame::Window {
            stream_id: self.stream_id,
            credit,
        });
    }

    fn release_slot(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.borrow_mut().release(slot);
            self.slot_offset = 0;
            self.slot_len = 0;
        }
    }

    /// Graceful close: FIN via output shutdown; the whole channel closes once
    /// the read side is finished too.
    fn do_end(&mut self) {
        self.state = WriteState::Closed;
        self.counters.stream_closed();
        self.key.clear_handler(OP_WRITE);
        let _ = self.key.disable(OP_WRITE);
        let _ = self.channel.borrow_mut().shutdown_output();

        let reader = self.correlated.take().and_then(|reader| reader.upgrade());
        match reader {
            Some(reader) => reader.borrow_mut().unlink(),
            None => {
                self.channel.borrow_mut().close();
                self.key.cancel();
            }
        }
    }

    /// Write failure: RESET the producer, abort the socket, take the read
    /// side down with us.
    fn do_write_fail(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        self.state = WriteState::Closed;
        self.counters.stream_closed();
        self.release_slot();
        self.throttle.borrow_mut().accept(Frame::Reset {
            stream_id: self.stream_id,
        });
        if let Some(reader) = self.correlated.take().and_then(|reader| reader.upgrade()) {
            reader.borrow_mut().abort_by_peer();
        }
        self.channel.borrow_mut().abort();
        self.key.cancel();
    }

    /// Abortive close without a RESET of our own (the producer asked for it
    /// or already aborted).
    fn do_abort_close(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        self.state = WriteState::Closed;
        self.counters.stream_closed();
        self.release_slot();
        if let Some(reader) = self.correlated.take().and_then(|reader| reader.upgrade()) {
            reader.borrow_mut().abort_by_peer();
        }
        self.channel.borrow_mut().abort();
        self.key.cancel();
    }

    /// Teardown driven by the correlated read side: local state plus a RESET
    /// so the producer stops sending -- the caller owns the socket and key.
    pub(crate) fn abort_by_peer(&mut self) {
        if self.state == WriteState::Closed {
            return;
        }
        self.state = WriteState::Closed;
        self.counters.stream_closed();
        self.release_slot();
        self.correlated = None;
        self.throttle.borrow_mut().accept(Frame::Reset {
            stream_id: self.stream_id,
        });
        self.key.clear_handler(OP_WRITE);
    }
}
