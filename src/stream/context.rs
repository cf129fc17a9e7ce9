//! State shared by the stream factories on one reactor

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::{Correlations, ReadStream, StreamChannel, WriteStream};
use crate::buffer::SlotPool;
use crate::config::TcpConfig;
use crate::counters::Counters;
use crate::frame::SharedFrameSink;
use crate::poller::Poller;
use crate::route::RouteTable;

/// Everything the accept, connect and reply paths share: id allocation,
/// registries, the slot pool, the route table and the named target sinks.
/// Single-threaded; all access goes through interior mutability.
pub(crate) struct StreamContext<C: StreamChannel + 'static> {
    pub config: TcpConfig,
    pub counters: Counters,
    pub poller: Rc<Poller>,
    pub server_routes: RefCell<RouteTable>,
    pub client_routes: RefCell<RouteTable>,
    pub pool: Rc<RefCell<SlotPool>>,
    pub read_buffer: Rc<RefCell<Vec<u8>>>,
    pub correlations: RefCell<Correlations<C>>,
    pub throttles: RefCell<HashMap<u64, Weak<RefCell<ReadStream<C>>>>>,
    pub write_streams: RefCell<HashMap<u64, Rc<RefCell<WriteStream<C>>>>>,
    pub targets: RefCell<HashMap<String, SharedFrameSink>>,
    next_stream_id: Cell<u64>,
    next_correlation_id: Cell<u64>,
}

impl<C: StreamChannel + 'static> StreamContext<C> {
    pub fn new(config: TcpConfig, counters: Counters, poller: Rc<Poller>) -> Rc<Self> {
        Rc::new(Self {
            counters,
            poller,
            server_routes: RefCell::new(RouteTable::new()),
            client_routes: RefCell::new(RouteTable::new()),
            pool: Rc::new(RefCell::new(SlotPool::new(config.slot_count, config.slot_size))),
            read_buffer: Rc::new(RefCell::new(vec![0u8; config.read_buffer_size])),
            correlations: RefCell::new(Correlations::new()),
            throttles: RefCell::new(HashMap::new()),
            write_streams: RefCell::new(HashMap::new()),
            targets: RefCell::new(HashMap::new()),
            next_stream_id: Cell::new(1),
            next_correlation_id: Cell::new(1),
            config,
        })
    }

    /// Issues a stream id; ids are monotonic and never reused.
    pub fn supply_stream_id(&self) -> u64 {
        let id = self.next_stream_id.get();
        self.next_stream_id.set(id + 1);
        id
    }

    /// Issues a correlation id; ids are monotonic and never reused.
    pub fn supply_correlation_id(&self) -> u64 {
        let id = self.next_correlation_id.get();
        self.next_correlation_id.set(id + 1);
        id
    }

    /// Looks up the sink registered under `name`.
    pub fn target(&self, name: &str) -> Option<SharedFrameSink> {
        self.targets.borrow().get(name).cloned()
    }

    /// Drops registry entries that can no longer be reached: correlations
    /// whose socket closed, throttles of dead or ended read streams, write
    /// streams that finished.
    pub fn sweep(&self) {
        self.correlations.borrow_mut().sweep();
        self.throttles.borrow_mut().retain(|_, stream| {
            stream
                .upgrade()
                .map_or(false, |stream| !stream.borrow().is_closed())
        });
        self.write_streams
            .borrow_mut()
            .retain(|_, stream| !stream.borrow().is_closed());
    }
}
