//! Readiness-poll reactor over mio

use log::{trace, warn};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;


/// Interest mask bit for read readiness.
pub const OP_READ: u8 = 0b01;
/// Interest mask bit for write readiness.
pub const OP_WRITE: u8 = 0b10;

/// A per-op readiness callback. Returns a work count for fairness accounting.
pub type Handler = Rc<dyn Fn() -> io::Result<usize>>;

type KeyMap = RefCell<HashMap<Token, Rc<PollerKey>>>;
type DispatchQueue = RefCell<Vec<(Token, u8)>>;

/// Registers socket handles with the OS readiness interface and dispatches
/// readiness callbacks synchronously on the reactor thread.
///
/// mio reports readiness edge-triggered, while the stream state machines are
/// written against level semantics: re-enabling an op (say, OP_READ after a
/// window refill) must take effect even if the socket became ready long ago.
/// [PollerKey::enable] therefore queues an immediate dispatch of the enabled
/// op, and handlers that stop with work plausibly remaining re-queue
/// themselves via [PollerKey::schedule].
pub struct Poller {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    registry: Registry,
    keys: Rc<KeyMap>,
    queue: Rc<DispatchQueue>,
    next_token: Cell<usize>,
}

impl Poller {
    /// Creates a reactor backed by the OS readiness interface.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(1024)),
            registry,
            keys: Rc::new(RefCell::new(HashMap::new())),
            queue: Rc::new(RefCell::new(Vec::new())),
            next_token: Cell::new(0),
        })
    }

    /// Registers `source` and returns its key.
    ///
    /// With an empty `interest` mask the OS registration is deferred until
    /// the first [PollerKey::enable].
    pub fn register(
        &self,
        source: Rc<RefCell<dyn Source>>,
        interest: u8,
    ) -> io::Result<Rc<PollerKey>> {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);

        if interest != 0 {
            source
                .borrow_mut()
                .register(&self.registry, token, to_interest(interest))?;
        }

        let key = Rc::new(PollerKey {
            token,
            registry: self.registry.try_clone()?,
            source: RefCell::new(Some(source)),
            interest: Cell::new(interest),
            scheduled_ops: Cell::new(0),
            read_handler: RefCell::new(None),
            write_handler: RefCell::new(None),
            cancelled: Cell::new(false),
            keys: Rc::downgrade(&self.keys),
            queue: Rc::downgrade(&self.queue),
        });
        self.keys.borrow_mut().insert(token, Rc::clone(&key));
        trace!("registered token {} interest {:02b}", token.0, interest);
        Ok(key)
    }

    /// Runs one reactor turn: queued dispatches, one OS poll bounded by
    /// `timeout`, then whatever those handlers queued in turn.
    ///
    /// Returns the total work count reported by the handlers that ran.
    pub fn poll_once(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut work_count = self.run_queued();

        // Do not sleep on the OS while queued work already made progress.
        let timeout = if work_count > 0 {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        let mut ready = Vec::new();
        {
            let mut poll = self.poll.borrow_mut();
            let mut events = self.events.borrow_mut();
            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
            for event in events.iter() {
                let mut ops = 0u8;
                if event.is_readable() {
                    ops |= OP_READ;
                }
                if event.is_writable() {
                    ops |= OP_WRITE;
                }
                if ops != 0 {
                    ready.push((event.token(), ops));
                }
            }
        }

        for (token, ops) in ready {
            let key = self.keys.borrow().get(&token).cloned();
            if let Some(key) = key {
                work_count += dispatch(&key, ops);
            }
        }

        work_count += self.run_queued();
        Ok(work_count)
    }

    fn run_queued(&self) -> usize {
        let mut work_count = 0;
        let batch: Vec<(Token, u8)> = self.queue.borrow_mut().split_off(0);
        for (token, ops) in batch {
            let key = self.keys.borrow().get(&token).cloned();
            if let Some(key) = key {
                key.scheduled_ops.set(key.scheduled_ops.get() & !ops);
                // Only ops still of interest; the stream may have backed off
                // between scheduling and now.
                work_count += dispatch(&key, ops & key.interest.get());
            }
        }
        work_count
    }
}

fn dispatch(key: &Rc<PollerKey>, ops: u8) -> usize {
    let mut work_count = 0;
    for (op, slot) in [(OP_READ, &key.read_handler), (OP_WRITE, &key.write_handler)] {
        if ops & op == 0 || key.cancelled.get() {
            continue;
        }
        let handler = slot.borrow().clone();
        if let Some(handler) = handler {
            match handler() {
                Ok(n) => work_count += n,
                Err(e) => {
                    warn!("handler error on token {}: {}", key.token.0, e);
                    key.cancel();
                }
            }
        }
    }
    work_count
}

/// A registration handle carrying per-op handler slots.
///
/// One key serves a whole connection: the read stream and the write stream
/// each install a handler and toggle their own interest bit. Cancelling
/// drops both handlers and deregisters the source.
pub struct PollerKey {
    token: Token,
    registry: Registry,
    source: RefCell<Option<Rc<RefCell<dyn Source>>>>,
    interest: Cell<u8>,
    scheduled_ops: Cell<u8>,
    read_handler: RefCell<Option<Handler>>,
    write_handler: RefCell<Option<Handler>>,
    cancelled: Cell<bool>,
    keys: Weak<KeyMap>,
    queue: Weak<DispatchQueue>,
}

impl PollerKey {
    /// Installs the handler for `op`, replacing any previous one.
    pub fn handler(&self, op: u8, handler: Handler) {
        match op {
            OP_READ => *self.read_handler.borrow_mut() = Some(handler),
            OP_WRITE => *self.write_handler.borrow_mut() = Some(handler),
            _ => unreachable!("unknown op {:02b}", op),
        }
    }

    /// Drops the handler for `op`, releasing whatever it captured.
    pub fn clear_handler(&self, op: u8) {
        match op {
            OP_READ => *self.read_handler.borrow_mut() = None,
            OP_WRITE => *self.write_handler.borrow_mut() = None,
            _ => unreachable!("unknown op {:02b}", op),
        }
    }

    /// Adds `ops` to the interest set and queues an immediate dispatch of them.
    pub fn enable(&self, ops: u8) -> io::Result<()> {
        if self.cancelled.get() {
            return Ok(());
        }
        let current = self.interest.get();
        let wanted = current | ops;
        if wanted != current {
            if let Some(source) = self.source.borrow().as_ref() {
                let mut source = source.borrow_mut();
                if current == 0 {
                    source.register(&self.registry, self.token, to_interest(wanted))?;
                } else {
                    source.reregister(&self.registry, self.token, to_interest(wanted))?;
                }
            }
            self.interest.set(wanted);
        }
        self.schedule(ops);
        Ok(())
    }

    /// Removes `ops` from the interest set; deregisters when none remain.
    pub fn disable(&self, ops: u8) -> io::Result<()> {
        if self.cancelled.get() {
            return Ok(());
        }
        let current = self.interest.get();
        let wanted = current & !ops;
        if wanted != current {
            if let Some(source) = self.source.borrow().as_ref() {
                let mut source = source.borrow_mut();
                if wanted == 0 {
                    source.deregister(&self.registry)?;
                } else {
                    source.reregister(&self.registry, self.token, to_interest(wanted))?;
                }
            }
            self.interest.set(wanted);
        }
        Ok(())
    }

    /// Queues a dispatch of `ops` on the next reactor turn without waiting
    /// for a readiness edge.
    pub fn schedule(&self, ops: u8) {
        if self.cancelled.get() {
            return;
        }
        let pending = self.scheduled_ops.get();
        let fresh = ops & !pending;
        if fresh == 0 {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            self.scheduled_ops.set(pending | fresh);
            queue.borrow_mut().push((self.token, fresh));
        }
    }

    /// Cancels the registration: deregisters the source and drops both
    /// handlers. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        if let Some(source) = self.source.borrow_mut().take() {
            if self.interest.get() != 0 {
                if let Err(e) = source.borrow_mut().deregister(&self.registry) {
                    trace!("deregister on cancel: {}", e);
                }
            }
        }
        self.interest.set(0);
        *self.read_handler.borrow_mut() = None;
        *self.write_handler.borrow_mut() = None;
        if let Some(keys) = self.keys.upgrade() {
            keys.borrow_mut().remove(&self.token);
        }
    }

    /// Whether [cancel](PollerKey::cancel) has run.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

fn to_interest(ops: u8) -> Interest {
    match (ops & OP_READ != 0, ops & OP_WRITE != 0) {
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (false, false) => unreachable!("empty interest"),
    }
}
