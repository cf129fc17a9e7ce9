//! Socket-to-fabric pump under a credit window

use bytes::Bytes;
use log::{trace, warn};
use std::cell::RefCell;
use std::cmp;
use std::io;
use std::rc::{Rc, Weak};

use super::{SharedChannel, StreamChannel, WriteStream};
use crate::counters::Counters;
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::{PollerKey, OP_READ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Closed,
}

/// Drains socket bytes into DATA frames toward a downstream consumer.
///
/// The stream starts with an empty window and OP_READ disabled; the first
/// WINDOW frame on the throttle opens the tap. Every DATA frame carries
/// exactly the bytes of one socket read, and their sum never exceeds the
/// credit received. EOF and read errors both end the stream gracefully with
/// END; the consumer tells an abortive close apart by the RESET its next
/// write receives.
pub struct ReadStream<C: StreamChannel> {
    target: SharedFrameSink,
    stream_id: u64,
    key: Rc<PollerKey>,
    channel: SharedChannel<C>,
    read_buffer: Rc<RefCell<Vec<u8>>>,
    window: u32,
    state: ReadState,
    correlated: Option<Weak<RefCell<WriteStream<C>>>>,
    counters: Counters,
}

impl<C: StreamChannel> ReadStream<C> {
    /// Creates a stream pumping `channel` toward `target` as `stream_id`.
    pub fn new(
        target: SharedFrameSink,
        stream_id: u64,
        key: Rc<PollerKey>,
        channel: SharedChannel<C>,
        read_buffer: Rc<RefCell<Vec<u8>>>,
        counters: Counters,
    ) -> Self {
        Self {
            target,
            stream_id,
            key,
            channel,
            read_buffer,
            window: 0,
            state: ReadState::Open,
            correlated: None,
            counters,
        }
    }

    /// Id of the stream toward the downstream consumer.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Whether the stream has ended.
    pub fn is_closed(&self) -> bool {
        self.state == ReadState::Closed
    }

    /// Remaining credit in bytes.
    pub fn window(&self) -> u32 {
        self.window
    }

    pub(crate) fn set_correlated(&mut self, writer: Weak<RefCell<WriteStream<C>>>) {
        self.correlated = Some(writer);
    }

    pub(crate) fn unlink(&mut self) {
        self.correlated = None;
    }

    /// OP_READ readiness: reads at most `min(window, buffer)` bytes and emits
    /// them as one DATA frame.
    pub fn handle_read(&mut self) -> io::Result<usize> {
        if self.state == ReadState::Closed || self.window == 0 {
            return Ok(0);
        }

        let mut buffer = self.read_buffer.borrow_mut();
        let limit = cmp::min(self.window as usize, buffer.len());
        let result = {
            let mut channel = self.channel.borrow_mut();
            channel.read(&mut buffer[..limit])
        };

        match result {
            Ok(0) => {
                drop(buffer);
                trace!("stream {} read EOF", self.stream_id);
                self.do_end();
                Ok(1)
            }
            Ok(bytes_read) => {
                let payload = Bytes::copy_from_slice(&buffer[..bytes_read]);
                drop(buffer);
                trace!("stream {} read {} bytes", self.stream_id, bytes_read);
                self.target.borrow_mut().accept(Frame::Data {
                    stream_id: self.stream_id,
                    payload,
                });
                self.window -= bytes_read as u32;
                if self.window == 0 {
                    self.key.disable(OP_READ)?;
                } else {
                    // Readiness is edge-triggered; the socket may hold more
                    // bytes, or an EOF that arrived with them. Revisit until
                    // it reports empty.
                    self.key.schedule(OP_READ);
                }
                Ok(bytes_read)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                // An abortive close by the peer surfaces as a read error; for
                // the downstream reader it is still the end of input.
                drop(buffer);
                trace!("stream {} read error treated as EOF: {}", self.stream_id, e);
                self.do_end();
                Ok(1)
            }
        }
    }

    /// WINDOW and RESET frames arriving on the throttle.
    pub fn handle_throttle(&mut self, frame: Frame) {
        match frame {
            Frame::Window { credit, .. } => {
                if self.state == ReadState::Closed {
                    return;
                }
                if credit < 0 {
                    warn!(
                        "stream {} received negative credit {}",
                        self.stream_id, credit
                    );
                    self.do_abort();
                    return;
                }
                let was_exhausted = self.window == 0;
                self.window = self.window.saturating_add(credit as u32);
                if was_exhausted && self.window > 0 {
                    if let Err(e) = self.key.enable(OP_READ) {
                        warn!("stream {} enable read: {}", self.stream_id, e);
                        self.do_end();
                    }
                }
            }
            Frame::Reset { .. } => self.do_reset(),
            other => warn!(
                "stream {} unexpected frame on throttle: {:?}",
                self.stream_id, other
            ),
        }
    }

    /// Graceful end: END downstream, read interest gone; the socket stays
    /// open while a correlated writer is still draining.
    fn do_end(&mut self) {
        if self.state == ReadState::Closed {
            return;
        }
        self.state = ReadState::Closed;
        self.counters.stream_closed();
        self.target.borrow_mut().accept(Frame::End {
            stream_id: self.stream_id,
        });
        let _ = self.key.disable(OP_READ);
        self.key.clear_handler(OP_READ);

        let writer_draining = self
            .correlated
            .take()
            .and_then(|writer| writer.upgrade())
            .is_some();
        if !writer_draining {
            self.channel.borrow_mut().close();
            self.key.cancel();
        }
    }

    /// Teardown on RESET from the consumer: both halves go down, RST out.
    fn do_reset(&mut self) {
        if self.state == ReadState::Closed {
            return;
        }
        self.state = ReadState::Closed;
        self.counters.stream_closed();
        self.key.clear_handler(OP_READ);
        if let Some(writer) = self.correlated.take().and_then(|writer| writer.upgrade()) {
            writer.borrow_mut().abort_by_peer();
        }
        self.channel.borrow_mut().abort();
        self.key.cancel();
    }

    /// Protocol error on the throttle: ABORT downstream, then teardown as for
    /// RESET.
    fn do_abort(&mut self) {
        if self.state == ReadState::Closed {
            return;
        }
        self.state = ReadState::Closed;
        self.counters.stream_closed();
        self.target.borrow_mut().accept(Frame::Abort {
            stream_id: self.stream_id,
        });
        self.key.clear_handler(OP_READ);
        if let Some(writer) = self.correlated.take().and_then(|writer| writer.upgrade()) {
            writer.borrow_mut().abort_by_peer();
        }
        self.channel.borrow_mut().abort();
        self.key.cancel();
    }

    /// Teardown driven by the correlated write side: ABORT downstream, local
    /// state only -- the caller owns the socket and key transitions.
    pub(crate) fn abort_by_peer(&mut self) {
        if self.state == ReadState::Closed {
            return;
        }
        self.state = ReadState::Closed;
        self.counters.stream_closed();
        self.correlated = None;
        self.target.borrow_mut().accept(Frame::Abort {
            stream_id: self.stream_id,
        });
        self.key.clear_handler(OP_READ);
    }
}
