//! Client-side stream factory: connected sockets for routed output streams

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use super::{ReadStream, SharedChannel, StreamChannel, StreamContext, WriteStream};
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::{PollerKey, OP_READ, OP_WRITE};
use crate::route::Route;

/// Wires a completed outbound connection: the initiator's stream becomes the
/// write side, the reply BEGIN (echoing the initiator's correlation id) opens
/// the read side back toward the initiator.
pub(crate) fn on_connected<C: StreamChannel + 'static>(
    ctx: &Rc<StreamContext<C>>,
    cell: SharedChannel<C>,
    key: Rc<PollerKey>,
    route: &Route,
    stream_id: u64,
    correlation_id: u64,
    throttle: SharedFrameSink,
) -> io::Result<()> {
    let (local_addr, remote_addr) = {
        let channel = cell.borrow();
        (channel.local_addr()?, channel.peer_addr()?)
    };
    let reply = ctx.target(&route.source_name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no target named {}", route.source_name),
        )
    })?;

    let reply_id = ctx.supply_stream_id();
    reply.borrow_mut().accept(Frame::Begin {
        stream_id: reply_id,
        reference_id: 0,
        correlation_id,
        local_addr,
        remote_addr,
    });

    let reader = Rc::new(RefCell::new(ReadStream::new(
        Rc::clone(&reply),
        reply_id,
        Rc::clone(&key),
        Rc::clone(&cell),
        Rc::clone(&ctx.read_buffer),
        ctx.counters.clone(),
    )));
    let handler_reader = Rc::clone(&reader);
    key.handler(
        OP_READ,
        Rc::new(move || handler_reader.borrow_mut().handle_read()),
    );
    ctx.throttles
        .borrow_mut()
        .insert(reply_id, Rc::downgrade(&reader));
    ctx.counters.stream_opened();

    let writer = Rc::new(RefCell::new(WriteStream::new(
        throttle,
        stream_id,
        Rc::clone(&key),
        cell,
        Rc::clone(&ctx.pool),
        ctx.config.window_bytes,
        ctx.counters.clone(),
    )));
    reader.borrow_mut().set_correlated(Rc::downgrade(&writer));
    writer.borrow_mut().set_correlated(Rc::downgrade(&reader));

    let handler_writer = Rc::clone(&writer);
    key.handler(
        OP_WRITE,
        Rc::new(move || handler_writer.borrow_mut().handle_write()),
    );
    writer.borrow_mut().do_connected();
    ctx.write_streams.borrow_mut().insert(stream_id, writer);
    ctx.counters.stream_opened();
    Ok(())
}
