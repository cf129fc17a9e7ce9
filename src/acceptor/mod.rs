//! Listening sockets and connection admission

use log::{trace, warn};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use crate::poller::{PollerKey, OP_READ};
use crate::route::RouteAddress;
use crate::stream::{on_accepted, StreamContext};

struct ListenerEntry {
    key: Rc<PollerKey>,
    route_count: usize,
}

/// Owns one listening socket per unique (address, port) and admits accepted
/// connections against the route table.
///
/// Several routes may share a listener; it closes when the last of them is
/// unrouted. A connection no route admits is closed immediately.
pub(crate) struct Acceptor {
    ctx: Rc<StreamContext<TcpStream>>,
    listeners: HashMap<(RouteAddress, u16), ListenerEntry>,
}

impl Acceptor {
    pub fn new(ctx: Rc<StreamContext<TcpStream>>) -> Self {
        Self {
            ctx,
            listeners: HashMap::new(),
        }
    }

    /// Binds a listener for `(address, port)` unless one exists, and counts
    /// the route against it.
    pub fn register(&mut self, source_name: &str, port: u16, address: RouteAddress) -> io::Result<()> {
        if let Some(entry) = self.listeners.get_mut(&(address, port)) {
            entry.route_count += 1;
            return Ok(());
        }

        let bind_ip = match address {
            RouteAddress::Ip(ip) => ip,
            RouteAddress::Any => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let listener = TcpListener::bind(SocketAddr::new(bind_ip, port))?;
        let listener = Rc::new(RefCell::new(listener));
        let source: Rc<RefCell<dyn Source>> = listener.clone();
        let key = self.ctx.poller.register(source, 0)?;

        let ctx = Rc::clone(&self.ctx);
        let source_name = source_name.to_string();
        key.handler(
            OP_READ,
            Rc::new(move || handle_accept(&ctx, &listener, &source_name, port)),
        );
        key.enable(OP_READ)?;

        trace!("listening on {}:{}", bind_ip, port);
        self.listeners
            .insert((address, port), ListenerEntry { key, route_count: 1 });
        Ok(())
    }

    /// Releases one route's claim on `(address, port)`; the listener closes
    /// with the last claim.
    pub fn unregister(&mut self, port: u16, address: RouteAddress) {
        let Some(entry) = self.listeners.get_mut(&(address, port)) else {
            return;
        };
        entry.route_count -= 1;
        if entry.route_count == 0 {
            entry.key.cancel();
            self.listeners.remove(&(address, port));
            trace!("stopped listening on port {}", port);
        }
    }
}

fn handle_accept(
    ctx: &Rc<StreamContext<TcpStream>>,
    listener: &Rc<RefCell<TcpListener>>,
    source_name: &str,
    port: u16,
) -> io::Result<usize> {
    let mut accepted = 0usize;
    loop {
        let result = listener.borrow_mut().accept();
        match result {
            Ok((channel, peer_addr)) => {
                let route = ctx
                    .server_routes
                    .borrow()
                    .resolve(source_name, port as u64, peer_addr.ip())
                    .cloned();
                match route {
                    Some(route) => match on_accepted(ctx, channel, &route) {
                        Ok(()) => accepted += 1,
                        Err(e) => warn!("wiring accepted {} failed: {}", peer_addr, e),
                    },
                    // Dropping the socket closes it before any bytes flow.
                    None => trace!("no route admits {}", peer_addr),
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::ConnectionAborted =>
            {
                continue
            }
            Err(e) => {
                warn!("accept error on port {}: {}", port, e);
                break;
            }
        }
    }
    Ok(accepted)
}
