use super::*;
use crate::buffer::SlotPool;
use crate::config::TcpConfig;
use crate::counters::Counters;
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::{Poller, PollerKey, OP_READ, OP_WRITE};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

const STREAM_ID: u64 = 7;

/// Wraps a real socket and overrides write results from a script: `0` forces
/// a zero-length write, `n` caps the bytes handed to the kernel. An empty
/// script delegates.
struct ScriptedChannel {
    inner: TcpStream,
    write_script: VecDeque<usize>,
}

impl ScriptedChannel {
    fn new(inner: TcpStream, script: &[usize]) -> Self {
        Self {
            inner,
            write_script: script.iter().copied().collect(),
        }
    }
}

impl StreamChannel for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        StreamChannel::read(&mut self.inner, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_script.pop_front() {
            None => StreamChannel::write(&mut self.inner, buf),
            Some(0) => Ok(0),
            Some(n) => StreamChannel::write(&mut self.inner, &buf[..n.min(buf.len())]),
        }
    }

    fn shutdown_output(&mut self) -> io::Result<()> {
        StreamChannel::shutdown_output(&mut self.inner)
    }

    fn set_immediate_reset(&mut self) -> io::Result<()> {
        StreamChannel::set_immediate_reset(&mut self.inner)
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        StreamChannel::take_error(&mut self.inner)
    }

    fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        StreamChannel::local_addr(&self.inner)
    }

    fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        StreamChannel::peer_addr(&self.inner)
    }
}

impl mio::event::Source for ScriptedChannel {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

fn collector() -> (SharedFrameSink, Rc<RefCell<Vec<Frame>>>) {
    let frames = Rc::new(RefCell::new(Vec::new()));
    let sink_frames = Rc::clone(&frames);
    let sink: SharedFrameSink =
        Rc::new(RefCell::new(move |frame| sink_frames.borrow_mut().push(frame)));
    (sink, frames)
}

fn socket_pair() -> (std::net::TcpStream, TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(4))).unwrap();
    let (accepted, _) = listener.accept().unwrap();
    accepted.set_nonblocking(true).unwrap();
    (peer, TcpStream::from_std(accepted))
}

struct WriteHarness {
    poller: Rc<Poller>,
    peer: std::net::TcpStream,
    cell: SharedChannel<ScriptedChannel>,
    key: Rc<PollerKey>,
    writer: Rc<RefCell<WriteStream<ScriptedChannel>>>,
    frames: Rc<RefCell<Vec<Frame>>>,
    counters: Counters,
}

impl WriteHarness {
    fn new(script: &[usize], slot_count: usize) -> Self {
        let poller = Rc::new(Poller::new().unwrap());
        let (peer, accepted) = socket_pair();
        let cell = ChannelCell::new(ScriptedChannel::new(accepted, script));
        let source: Rc<RefCell<dyn mio::event::Source>> = cell.clone();
        let key = poller.register(source, 0).unwrap();

        let (sink, frames) = collector();
        let counters = Counters::new();
        let config = TcpConfig::default()
            .with_window_bytes(65536)
            .with_slot_count(slot_count)
            .with_slot_size(65536);
        let pool = Rc::new(RefCell::new(SlotPool::new(
            config.slot_count,
            config.slot_size,
        )));
        let writer = Rc::new(RefCell::new(WriteStream::new(
            sink,
            STREAM_ID,
            Rc::clone(&key),
            Rc::clone(&cell),
            pool,
            config.window_bytes,
            counters.clone(),
        )));
        let handler_writer = Rc::clone(&writer);
        key.handler(
            OP_WRITE,
            Rc::new(move || handler_writer.borrow_mut().handle_write()),
        );
        counters.stream_opened();

        Self {
            poller,
            peer,
            cell,
            key,
            writer,
            frames,
            counters,
        }
    }

    fn drive_until<F: Fn(&Self) -> bool>(&self, done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(Instant::now() < deadline, "drain made no progress");
            self.poller
                .poll_once(Some(Duration::from_millis(10)))
                .unwrap();
        }
    }

    fn read_peer(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.peer.read_exact(&mut buf).unwrap();
        buf
    }

    fn peer_sees_fin(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.peer.read(&mut buf), Ok(0))
    }

    fn windows(&self) -> Vec<i32> {
        self.frames
            .borrow()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Window { credit, .. } => Some(*credit),
                _ => None,
            })
            .collect()
    }

    fn resets(&self) -> usize {
        self.frames
            .borrow()
            .iter()
            .filter(|frame| matches!(frame, Frame::Reset { .. }))
            .count()
    }
}

#[test]
fn spin_recovers_transient_zero_writes() {
    let mut harness = WriteHarness::new(&vec![0; WRITE_SPIN_COUNT - 1], 16);
    harness.writer.borrow_mut().handle_data(b"server data");

    assert!(!harness.writer.borrow().has_pending());
    assert_eq!(harness.read_peer(11), b"server data");
    assert_eq!(harness.windows(), vec![11]);
    assert_eq!(harness.counters.overflows(), 0);
}

#[test]
fn spin_exhaustion_parks_the_whole_payload() {
    let mut harness = WriteHarness::new(&vec![0; WRITE_SPIN_COUNT], 16);
    harness.writer.borrow_mut().handle_data(b"server data");

    assert!(harness.writer.borrow().has_pending());
    assert_eq!(harness.windows(), Vec::<i32>::new());

    harness.drive_until(|h| !h.writer.borrow().has_pending());
    assert_eq!(harness.read_peer(11), b"server data");
    assert_eq!(harness.windows(), vec![11]);
}

#[test]
fn partial_write_finishes_when_writable_again() {
    let mut harness = WriteHarness::new(&[5], 16);
    harness.writer.borrow_mut().handle_data(b"server data");

    // 5 bytes reached the socket, 6 are parked, credit withheld.
    assert!(harness.writer.borrow().has_pending());
    assert_eq!(harness.windows(), Vec::<i32>::new());

    harness.drive_until(|h| !h.writer.borrow().has_pending());
    assert_eq!(harness.read_peer(11), b"server data");
    assert_eq!(harness.windows(), vec![11]);
    assert_eq!(harness.counters.overflows(), 0);
}

#[test]
fn drain_survives_repeated_partial_writes() {
    let mut harness = WriteHarness::new(&[2, 3, 1], 16);
    harness.writer.borrow_mut().handle_data(b"server data");

    harness.drive_until(|h| !h.writer.borrow().has_pending());
    assert_eq!(harness.read_peer(11), b"server data");
    assert_eq!(harness.windows(), vec![11]);
}

#[test]
fn second_frame_queues_behind_pending_write() {
    let mut harness = WriteHarness::new(&[5], 16);
    harness.writer.borrow_mut().handle_data(b"server data 1");
    assert!(harness.writer.borrow().has_pending());
    harness.writer.borrow_mut().handle_data(b"server data 2");

    harness.drive_until(|h| !h.writer.borrow().has_pending());
    assert_eq!(harness.read_peer(26), b"server data 1server data 2");
    assert_eq!(harness.windows(), vec![26]);
}

#[test]
fn end_with_pending_write_drains_then_fins() {
    let mut harness = WriteHarness::new(&[5], 16);
    harness.writer.borrow_mut().handle_data(b"server data");
    harness.writer.borrow_mut().handle_end();
    assert!(!harness.writer.borrow().is_closed());

    harness.drive_until(|h| h.writer.borrow().is_closed());
    assert_eq!(harness.read_peer(11), b"server data");
    assert!(harness.peer_sees_fin());
    assert_eq!(harness.resets(), 0);
    assert_eq!(harness.windows(), vec![11]);
}

#[test]
fn data_after_end_resets_but_still_drains() {
    let mut harness = WriteHarness::new(&[6], 16);
    harness.writer.borrow_mut().handle_data(b"server data");
    harness.writer.borrow_mut().handle_end();
    harness.writer.borrow_mut().handle_data(b"too late");

    assert_eq!(harness.resets(), 1);
    harness.drive_until(|h| h.writer.borrow().is_closed());
    assert_eq!(harness.read_peer(11), b"server data");
    assert!(harness.peer_sees_fin());
}

#[test]
fn slot_exhaustion_counts_overflow_and_resets() {
    let harness = WriteHarness::new(&[5], 0);
    harness.writer.borrow_mut().handle_data(b"server data");

    assert_eq!(harness.counters.overflows(), 1);
    assert_eq!(harness.resets(), 1);
    assert!(harness.writer.borrow().is_closed());
    assert!(!harness.cell.borrow().is_open());
}

#[test]
fn reset_with_pending_write_is_deferred_until_drained() {
    let harness = WriteHarness::new(&[5], 16);
    harness.writer.borrow_mut().handle_data(b"server data");
    harness.writer.borrow_mut().handle_reset();
    assert!(!harness.writer.borrow().is_closed());

    harness.drive_until(|h| h.writer.borrow().is_closed());
    assert!(!harness.cell.borrow().is_open());
    // The producer asked for the teardown; no RESET comes back.
    assert_eq!(harness.resets(), 0);
}

struct ReadHarness {
    poller: Rc<Poller>,
    cell: SharedChannel<TcpStream>,
    reader: Rc<RefCell<ReadStream<TcpStream>>>,
    frames: Rc<RefCell<Vec<Frame>>>,
}

impl ReadHarness {
    fn new() -> (Self, std::net::TcpStream) {
        let poller = Rc::new(Poller::new().unwrap());
        let (peer, accepted) = socket_pair();
        let cell = ChannelCell::new(accepted);
        let source: Rc<RefCell<dyn mio::event::Source>> = cell.clone();
        let key = poller.register(source, 0).unwrap();

        let (sink, frames) = collector();
        let config = TcpConfig::default().with_read_buffer_size(65535);
        let reader = Rc::new(RefCell::new(ReadStream::new(
            sink,
            STREAM_ID,
            Rc::clone(&key),
            Rc::clone(&cell),
            Rc::new(RefCell::new(vec![0u8; config.read_buffer_size])),
            Counters::new(),
        )));
        let handler_reader = Rc::clone(&reader);
        key.handler(
            OP_READ,
            Rc::new(move || handler_reader.borrow_mut().handle_read()),
        );

        (
            Self {
                poller,
                cell,
                reader,
                frames,
            },
            peer,
        )
    }

    fn grant(&self, credit: i32) {
        self.reader.borrow_mut().handle_throttle(Frame::Window {
            stream_id: STREAM_ID,
            credit,
        });
    }

    fn drive_until<F: Fn(&Self) -> bool>(&self, done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(Instant::now() < deadline, "read made no progress");
            self.poller
                .poll_once(Some(Duration::from_millis(10)))
                .unwrap();
        }
    }

    fn data_bytes(&self) -> Vec<u8> {
        self.frames
            .borrow()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Data { payload, .. } => Some(payload.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn ended(&self) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| matches!(frame, Frame::End { .. }))
    }

    fn aborted(&self) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| matches!(frame, Frame::Abort { .. }))
    }
}

#[test]
fn reads_are_gated_by_the_window() {
    let (harness, mut peer) = ReadHarness::new();
    peer.write_all(b"client data").unwrap();

    // No credit, no frames.
    for _ in 0..3 {
        harness
            .poller
            .poll_once(Some(Duration::from_millis(10)))
            .unwrap();
    }
    assert!(harness.frames.borrow().is_empty());

    harness.grant(5);
    harness.drive_until(|h| h.data_bytes().len() == 5);
    assert_eq!(harness.data_bytes(), b"clien");
    assert_eq!(harness.reader.borrow().window(), 0);

    harness.grant(100);
    harness.drive_until(|h| h.data_bytes().len() == 11);
    assert_eq!(harness.data_bytes(), b"client data");
    assert_eq!(harness.reader.borrow().window(), 100 - 6);
}

#[test]
fn eof_emits_end_and_closes() {
    let (harness, mut peer) = ReadHarness::new();
    harness.grant(65535);
    peer.write_all(b"bye").unwrap();
    peer.shutdown(std::net::Shutdown::Write).unwrap();

    harness.drive_until(|h| h.ended());
    assert_eq!(harness.data_bytes(), b"bye");
    assert!(harness.reader.borrow().is_closed());
    assert!(!harness.cell.borrow().is_open());
}

#[test]
fn abortive_peer_close_still_reads_as_end() {
    let (harness, peer) = ReadHarness::new();
    harness.grant(65535);

    // RST instead of FIN: linger zero, then close.
    socket2::SockRef::from(&peer)
        .set_linger(Some(Duration::from_secs(0)))
        .unwrap();
    drop(peer);

    harness.drive_until(|h| h.ended());
    assert!(!harness.aborted());
    assert!(harness.reader.borrow().is_closed());
}

#[test]
fn reset_aborts_the_socket() {
    let (harness, mut peer) = ReadHarness::new();
    harness.grant(65535);
    harness.reader.borrow_mut().handle_throttle(Frame::Reset {
        stream_id: STREAM_ID,
    });

    assert!(harness.reader.borrow().is_closed());
    assert!(!harness.cell.borrow().is_open());
    // The peer sees an abortive close, not a graceful FIN.
    let mut buf = [0u8; 8];
    match peer.read(&mut buf) {
        Ok(0) => panic!("expected RST, got FIN"),
        Ok(_) => panic!("expected RST, got data"),
        Err(_) => {}
    }
    // No END or ABORT follows a consumer-side reset.
    assert!(harness.frames.borrow().is_empty());
}

#[test]
fn negative_credit_is_a_protocol_error() {
    let (harness, _peer) = ReadHarness::new();
    harness.grant(10);
    harness.grant(-1);

    assert!(harness.aborted());
    assert!(harness.reader.borrow().is_closed());
    assert!(!harness.cell.borrow().is_open());
}
