//! Outbound connections for routed output streams

use log::{trace, warn};
use mio::event::Source;
use mio::net::TcpStream;
use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::error::Error;
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::OP_WRITE;
use crate::route::{Route, RouteAddress};
use crate::stream::{on_connected, ChannelCell, StreamContext};

enum Completion {
    Pending,
    Connected,
    Failed(io::Error),
}

/// Starts a non-blocking connect for the output stream `stream_id` and
/// finishes the wiring when the socket reports writable.
///
/// Connect failures emit RESET on `throttle` and close the socket; nothing
/// is retried.
pub(crate) fn connect(
    ctx: &Rc<StreamContext<TcpStream>>,
    route: &Route,
    stream_id: u64,
    correlation_id: u64,
    throttle: SharedFrameSink,
) -> Result<(), Error> {
    let RouteAddress::Ip(ip) = route.address else {
        throttle.borrow_mut().accept(Frame::Reset { stream_id });
        return Err(Error::AddressRequired);
    };
    let addr = SocketAddr::new(ip, route.target_ref as u16);

    let channel = match TcpStream::connect(addr) {
        Ok(channel) => channel,
        Err(e) => {
            warn!("connect to {} failed: {}", addr, e);
            throttle.borrow_mut().accept(Frame::Reset { stream_id });
            return Err(e.into());
        }
    };

    let cell = ChannelCell::new(channel);
    let source: Rc<RefCell<dyn Source>> = cell.clone();
    let key = ctx.poller.register(source, 0)?;

    let handler_ctx = Rc::clone(ctx);
    let handler_cell = Rc::clone(&cell);
    let handler_key = Rc::clone(&key);
    let handler_throttle = Rc::clone(&throttle);
    let handler_route = route.clone();
    key.handler(
        OP_WRITE,
        Rc::new(move || {
            let completion = {
                let mut channel = handler_cell.borrow_mut();
                match channel.take_error() {
                    Err(e) | Ok(Some(e)) => Completion::Failed(e),
                    Ok(None) => match channel.peer_addr() {
                        Ok(_) => Completion::Connected,
                        Err(ref e)
                            if e.kind() == io::ErrorKind::NotConnected
                                || e.kind() == io::ErrorKind::WouldBlock =>
                        {
                            Completion::Pending
                        }
                        Err(e) => Completion::Failed(e),
                    },
                }
            };
            match completion {
                Completion::Pending => Ok(0),
                Completion::Failed(e) => {
                    warn!("connect to {} completed with error: {}", addr, e);
                    handler_throttle
                        .borrow_mut()
                        .accept(Frame::Reset { stream_id });
                    handler_cell.borrow_mut().close();
                    handler_key.cancel();
                    Ok(1)
                }
                Completion::Connected => {
                    trace!("connected to {}", addr);
                    // The write stream takes this op over.
                    handler_key.clear_handler(OP_WRITE);
                    let _ = handler_key.disable(OP_WRITE);
                    if let Err(e) = on_connected(
                        &handler_ctx,
                        Rc::clone(&handler_cell),
                        Rc::clone(&handler_key),
                        &handler_route,
                        stream_id,
                        correlation_id,
                        Rc::clone(&handler_throttle),
                    ) {
                        warn!("wiring connected {} failed: {}", addr, e);
                        handler_throttle
                            .borrow_mut()
                            .accept(Frame::Reset { stream_id });
                        handler_cell.borrow_mut().close();
                        handler_key.cancel();
                    }
                    Ok(1)
                }
            }
        }),
    );
    key.enable(OP_WRITE)?;
    Ok(())
}
