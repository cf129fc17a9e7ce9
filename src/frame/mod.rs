//! Frames exchanged with the stream fabric, and their wire codec

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

use crate::error::Error;

#[cfg(test)]
mod frame_test;

/// Hard cap on a DATA frame payload; the wire length field is 16 bits.
pub const MAX_DATA_PAYLOAD: usize = u16::MAX as usize;

/// Size of the fixed frame header: kind, stream id, body length.
pub const HEADER_SIZE: usize = 1 + 8 + 2;

const KIND_BEGIN: u8 = 0x01;
const KIND_DATA: u8 = 0x02;
const KIND_END: u8 = 0x03;
const KIND_ABORT: u8 = 0x04;
const KIND_RESET: u8 = 0x40;
const KIND_WINDOW: u8 = 0x41;

const ADDR_FAMILY_V4: u8 = 4;
const ADDR_FAMILY_V6: u8 = 6;

/// A frame on the stream fabric.
///
/// BEGIN, DATA, END and ABORT travel in the direction of the data; RESET and
/// WINDOW travel the opposite way on the throttle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens a logical stream.
    Begin {
        /// Id of the new stream.
        stream_id: u64,
        /// Route reference; zero marks a reply to a previously issued BEGIN.
        reference_id: u64,
        /// Token pairing this BEGIN with its eventual reply.
        correlation_id: u64,
        /// Local endpoint of the underlying connection.
        local_addr: SocketAddr,
        /// Remote endpoint of the underlying connection.
        remote_addr: SocketAddr,
    },
    /// Carries payload bytes, at most [MAX_DATA_PAYLOAD] of them.
    Data {
        /// Id of the carrying stream.
        stream_id: u64,
        /// The payload bytes.
        payload: Bytes,
    },
    /// Graceful end of a stream; no further frames follow on it.
    End {
        /// Id of the ending stream.
        stream_id: u64,
    },
    /// Abnormal end of a stream; no further frames follow on it.
    Abort {
        /// Id of the aborted stream.
        stream_id: u64,
    },
    /// Throttle: tells the producer to tear the stream down.
    Reset {
        /// Id of the stream being reset.
        stream_id: u64,
    },
    /// Throttle: grants `credit` more payload bytes to the producer.
    Window {
        /// Id of the credited stream.
        stream_id: u64,
        /// Credit delta in bytes.
        credit: i32,
    },
}

impl Frame {
    /// Id of the stream this frame belongs to.
    pub fn stream_id(&self) -> u64 {
        match *self {
            Frame::Begin { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::End { stream_id }
            | Frame::Abort { stream_id }
            | Frame::Reset { stream_id }
            | Frame::Window { stream_id, .. } => stream_id,
        }
    }
}

/// Consumes frames on behalf of a downstream peer.
pub trait FrameSink {
    /// Accepts one frame. Ordering follows the call order.
    fn accept(&mut self, frame: Frame);
}

impl<F: FnMut(Frame)> FrameSink for F {
    fn accept(&mut self, frame: Frame) {
        (self)(frame)
    }
}

/// Shared handle to a [FrameSink]; all sinks live on the reactor thread.
pub type SharedFrameSink = Rc<RefCell<dyn FrameSink>>;

/// Encodes `frame` onto the tail of `buf`.
///
/// Returns an error for a DATA payload exceeding [MAX_DATA_PAYLOAD]; the
/// adapter never fragments, so oversized payloads are a caller bug.
pub fn encode(frame: &Frame, buf: &mut BytesMut) -> Result<(), Error> {
    match frame {
        Frame::Begin {
            stream_id,
            reference_id,
            correlation_id,
            local_addr,
            remote_addr,
        } => {
            let body_len = 16 + encoded_addr_len(local_addr) + encoded_addr_len(remote_addr);
            put_header(buf, KIND_BEGIN, *stream_id, body_len);
            buf.put_u64_le(*reference_id);
            buf.put_u64_le(*correlation_id);
            put_addr(buf, local_addr);
            put_addr(buf, remote_addr);
        }
        Frame::Data { stream_id, payload } => {
            if payload.len() > MAX_DATA_PAYLOAD {
                return Err(Error::Codec(format!(
                    "DATA payload {} exceeds {}",
                    payload.len(),
                    MAX_DATA_PAYLOAD
                )));
            }
            put_header(buf, KIND_DATA, *stream_id, payload.len());
            buf.put_slice(payload);
        }
        Frame::End { stream_id } => put_header(buf, KIND_END, *stream_id, 0),
        Frame::Abort { stream_id } => put_header(buf, KIND_ABORT, *stream_id, 0),
        Frame::Reset { stream_id } => put_header(buf, KIND_RESET, *stream_id, 0),
        Frame::Window { stream_id, credit } => {
            put_header(buf, KIND_WINDOW, *stream_id, 4);
            buf.put_i32_le(*credit);
        }
    }
    Ok(())
}

/// Decodes one frame from the head of `buf`, consuming its bytes.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let body_len = u16::from_le_bytes([buf[9], buf[10]]) as usize;
    if buf.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    let mut header = buf.split_to(HEADER_SIZE);
    let kind = header.get_u8();
    let stream_id = header.get_u64_le();
    let mut body = buf.split_to(body_len);

    let frame = match kind {
        KIND_BEGIN => {
            if body.len() < 16 {
                return Err(truncated("BEGIN"));
            }
            let reference_id = body.get_u64_le();
            let correlation_id = body.get_u64_le();
            let local_addr = get_addr(&mut body)?;
            let remote_addr = get_addr(&mut body)?;
            Frame::Begin {
                stream_id,
                reference_id,
                correlation_id,
                local_addr,
                remote_addr,
            }
        }
        KIND_DATA => Frame::Data {
            stream_id,
            payload: body.freeze(),
        },
        KIND_END => Frame::End { stream_id },
        KIND_ABORT => Frame::Abort { stream_id },
        KIND_RESET => Frame::Reset { stream_id },
        KIND_WINDOW => {
            if body.len() < 4 {
                return Err(truncated("WINDOW"));
            }
            Frame::Window {
                stream_id,
                credit: body.get_i32_le(),
            }
        }
        other => {
            return Err(Error::Codec(format!("unknown frame kind 0x{:02x}", other)));
        }
    };
    Ok(Some(frame))
}

fn put_header(buf: &mut BytesMut, kind: u8, stream_id: u64, body_len: usize) {
    buf.reserve(HEADER_SIZE + body_len);
    buf.put_u8(kind);
    buf.put_u64_le(stream_id);
    buf.put_u16_le(body_len as u16);
}

fn encoded_addr_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => 1 + 4 + 2,
        SocketAddr::V6(_) => 1 + 16 + 2,
    }
}

fn put_addr(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(ADDR_FAMILY_V4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(ADDR_FAMILY_V6);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16_le(addr.port());
}

fn get_addr(body: &mut BytesMut) -> Result<SocketAddr, Error> {
    if body.is_empty() {
        return Err(truncated("address"));
    }
    let ip = match body.get_u8() {
        ADDR_FAMILY_V4 => {
            if body.len() < 4 + 2 {
                return Err(truncated("address"));
            }
            let mut octets = [0u8; 4];
            body.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        ADDR_FAMILY_V6 => {
            if body.len() < 16 + 2 {
                return Err(truncated("address"));
            }
            let mut octets = [0u8; 16];
            body.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        family => {
            return Err(Error::Codec(format!("unknown address family {}", family)));
        }
    };
    let port = body.get_u16_le();
    Ok(SocketAddr::new(ip, port))
}

fn truncated(what: &str) -> Error {
    Error::Codec(format!("truncated {} frame body", what))
}
