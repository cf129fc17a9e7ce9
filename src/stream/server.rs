//! Server-side stream factory: accepted sockets and their reply streams

use log::warn;
use mio::event::Source;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use super::{ChannelCell, Correlation, ReadStream, StreamChannel, StreamContext, WriteStream};
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::{OP_READ, OP_WRITE};
use crate::route::Route;

/// Wires an accepted connection: BEGIN toward the route's target, a read
/// stream on OP_READ, and a parked [Correlation] so the reply BEGIN can
/// attach the write stream later.
pub(crate) fn on_accepted<C: StreamChannel + 'static>(
    ctx: &Rc<StreamContext<C>>,
    channel: C,
    route: &Route,
) -> io::Result<()> {
    let local_addr = channel.local_addr()?;
    let remote_addr = channel.peer_addr()?;
    let target = ctx.target(&route.target_name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no target named {}", route.target_name),
        )
    })?;

    let target_id = ctx.supply_stream_id();
    let correlation_id = ctx.supply_correlation_id();
    target.borrow_mut().accept(Frame::Begin {
        stream_id: target_id,
        reference_id: route.target_ref,
        correlation_id,
        local_addr,
        remote_addr,
    });

    let cell = ChannelCell::new(channel);
    let source: Rc<RefCell<dyn Source>> = cell.clone();
    let key = ctx.poller.register(source, 0)?;

    let stream = Rc::new(RefCell::new(ReadStream::new(
        Rc::clone(&target),
        target_id,
        Rc::clone(&key),
        Rc::clone(&cell),
        Rc::clone(&ctx.read_buffer),
        ctx.counters.clone(),
    )));
    let handler_stream = Rc::clone(&stream);
    key.handler(
        OP_READ,
        Rc::new(move || handler_stream.borrow_mut().handle_read()),
    );
    ctx.throttles
        .borrow_mut()
        .insert(target_id, Rc::downgrade(&stream));

    ctx.correlations.borrow_mut().put(
        correlation_id,
        Correlation {
            source: route.source_name.clone(),
            channel: cell,
            key,
            read_stream: Rc::downgrade(&stream),
            correlated_stream_id: target_id,
        },
    );
    ctx.counters.stream_opened();
    Ok(())
}

/// Consumes the [Correlation] named by a reply BEGIN and attaches the write
/// stream to the waiting connection. A missing correlation -- never created,
/// already consumed, or swept -- yields RESET.
pub(crate) fn on_reply_begin<C: StreamChannel + 'static>(
    ctx: &Rc<StreamContext<C>>,
    stream_id: u64,
    correlation_id: u64,
    throttle: SharedFrameSink,
) {
    let correlation = ctx.correlations.borrow_mut().remove(correlation_id);
    let Some(correlation) = correlation else {
        warn!(
            "no correlation {} for reply stream {}",
            correlation_id, stream_id
        );
        throttle.borrow_mut().accept(Frame::Reset { stream_id });
        return;
    };

    let stream = Rc::new(RefCell::new(WriteStream::new(
        throttle,
        stream_id,
        Rc::clone(&correlation.key),
        Rc::clone(&correlation.channel),
        Rc::clone(&ctx.pool),
        ctx.config.window_bytes,
        ctx.counters.clone(),
    )));

    // Cross-wire the halves so teardown in either direction reaches both.
    if let Some(reader) = correlation.read_stream.upgrade() {
        reader.borrow_mut().set_correlated(Rc::downgrade(&stream));
        stream
            .borrow_mut()
            .set_correlated(correlation.read_stream.clone());
    }

    let handler_stream = Rc::clone(&stream);
    correlation.key.handler(
        OP_WRITE,
        Rc::new(move || handler_stream.borrow_mut().handle_write()),
    );
    stream.borrow_mut().do_connected();
    ctx.write_streams.borrow_mut().insert(stream_id, stream);
    ctx.counters.stream_opened();
}
