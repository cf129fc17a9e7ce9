//! The adapter facade: control operations and fabric entry points

use log::{trace, warn};
use mio::net::TcpStream;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::acceptor::Acceptor;
use crate::config::TcpConfig;
use crate::connector;
use crate::counters::Counters;
use crate::error::Error;
use crate::frame::{Frame, SharedFrameSink};
use crate::poller::Poller;
use crate::route::{Route, RouteAddress};
use crate::stream::{on_reply_begin, StreamContext, WriteStream};

/// A TCP transport adapter instance: one reactor, its route tables, and the
/// registries pairing connections with logical streams.
///
/// All methods must be called from the reactor thread. Frames toward the
/// fabric are pushed into the sinks registered with
/// [register_target](TcpAdapter::register_target); frames from the fabric
/// come in through [handle_stream](TcpAdapter::handle_stream) and
/// [handle_throttle](TcpAdapter::handle_throttle). Nothing happens until
/// [poll_once](TcpAdapter::poll_once) turns the reactor.
pub struct TcpAdapter {
    ctx: Rc<StreamContext<TcpStream>>,
    acceptor: Acceptor,
}

impl TcpAdapter {
    /// Creates an adapter with `config`.
    pub fn new(config: TcpConfig) -> Result<Self, Error> {
        let poller = Rc::new(Poller::new()?);
        let ctx = StreamContext::new(config, Counters::new(), poller);
        Ok(Self {
            acceptor: Acceptor::new(Rc::clone(&ctx)),
            ctx,
        })
    }

    /// Handles to this adapter's counters.
    pub fn counters(&self) -> Counters {
        self.ctx.counters.clone()
    }

    /// Binds the sink frames for `name` are delivered to.
    pub fn register_target(&mut self, name: &str, sink: SharedFrameSink) {
        self.ctx.targets.borrow_mut().insert(name.to_string(), sink);
    }

    /// Registers an accept-side route: connections to `source_port` admitted
    /// by `address` flow to `target_name`. Returns the route's source ref.
    pub fn route_server(
        &mut self,
        source_name: &str,
        source_port: u16,
        target_name: &str,
        target_ref: u64,
        address: RouteAddress,
    ) -> Result<u64, Error> {
        self.acceptor.register(source_name, source_port, address)?;
        self.ctx.server_routes.borrow_mut().add(Route {
            source_name: source_name.to_string(),
            source_ref: source_port as u64,
            target_name: target_name.to_string(),
            target_ref,
            address,
        });
        self.ctx.counters.route_added();
        Ok(source_port as u64)
    }

    /// Removes an accept-side route; the listener closes with its last route.
    pub fn unroute_server(
        &mut self,
        source_name: &str,
        source_port: u16,
        target_name: &str,
        target_ref: u64,
        address: RouteAddress,
    ) -> Result<(), Error> {
        let removed = self
            .ctx
            .server_routes
            .borrow_mut()
            .remove(source_port as u64, |route| {
                route.source_name == source_name
                    && route.target_name == target_name
                    && route.target_ref == target_ref
                    && route.address == address
            });
        if !removed {
            return Err(unknown_route(source_name, source_port as u64));
        }
        self.ctx.counters.route_removed();
        self.acceptor.unregister(source_port, address);
        Ok(())
    }

    /// Registers a connect-side route: output streams opened under
    /// `source_ref` connect to `address`:`port`.
    pub fn route_client(
        &mut self,
        source_name: &str,
        source_ref: u64,
        target_name: &str,
        port: u16,
        address: RouteAddress,
    ) -> Result<(), Error> {
        if address == RouteAddress::Any {
            return Err(Error::AddressRequired);
        }
        self.ctx.client_routes.borrow_mut().add(Route {
            source_name: source_name.to_string(),
            source_ref,
            target_name: target_name.to_string(),
            target_ref: port as u64,
            address,
        });
        self.ctx.counters.route_added();
        Ok(())
    }

    /// Removes a connect-side route.
    pub fn unroute_client(
        &mut self,
        source_name: &str,
        source_ref: u64,
        target_name: &str,
        port: u16,
        address: RouteAddress,
    ) -> Result<(), Error> {
        let removed = self
            .ctx
            .client_routes
            .borrow_mut()
            .remove(source_ref, |route| {
                route.source_name == source_name
                    && route.target_name == target_name
                    && route.target_ref == port as u64
                    && route.address == address
            });
        if !removed {
            return Err(unknown_route(source_name, source_ref));
        }
        self.ctx.counters.route_removed();
        Ok(())
    }

    /// A frame from a downstream producer named `source`. WINDOW and RESET
    /// for the producer travel back on `throttle`.
    ///
    /// BEGIN with `reference_id == 0` attaches the write side of a
    /// previously accepted connection; a non-zero reference opens an
    /// outbound connection through the matching client route.
    pub fn handle_stream(
        &mut self,
        source: &str,
        frame: Frame,
        throttle: SharedFrameSink,
    ) -> Result<(), Error> {
        match frame {
            Frame::Begin {
                stream_id,
                reference_id,
                correlation_id,
                ..
            } => {
                if reference_id == 0 {
                    on_reply_begin(&self.ctx, stream_id, correlation_id, throttle);
                    Ok(())
                } else {
                    let route = self
                        .ctx
                        .client_routes
                        .borrow()
                        .resolve_by_ref(source, reference_id)
                        .cloned();
                    match route {
                        Some(route) => connector::connect(
                            &self.ctx,
                            &route,
                            stream_id,
                            correlation_id,
                            throttle,
                        ),
                        None => {
                            throttle.borrow_mut().accept(Frame::Reset { stream_id });
                            Err(unknown_route(source, reference_id))
                        }
                    }
                }
            }
            Frame::Data { stream_id, payload } => {
                match self.write_stream(stream_id) {
                    Some(stream) => {
                        stream.borrow_mut().handle_data(&payload);
                        self.reap(stream_id, &stream);
                    }
                    None => {
                        warn!("data for unknown stream {}", stream_id);
                        throttle.borrow_mut().accept(Frame::Reset { stream_id });
                    }
                }
                Ok(())
            }
            Frame::End { stream_id } => {
                if let Some(stream) = self.write_stream(stream_id) {
                    stream.borrow_mut().handle_end();
                    self.reap(stream_id, &stream);
                }
                Ok(())
            }
            Frame::Abort { stream_id } => {
                if let Some(stream) = self.write_stream(stream_id) {
                    stream.borrow_mut().handle_abort();
                    self.reap(stream_id, &stream);
                }
                Ok(())
            }
            Frame::Reset { stream_id } => {
                if let Some(stream) = self.write_stream(stream_id) {
                    stream.borrow_mut().handle_reset();
                    self.reap(stream_id, &stream);
                }
                Ok(())
            }
            Frame::Window { stream_id, .. } => {
                warn!("window frame on stream surface for {}", stream_id);
                Ok(())
            }
        }
    }

    /// A throttle frame from a downstream consumer for the stream this
    /// adapter emitted as `stream_id`.
    pub fn handle_throttle(&mut self, stream_id: u64, frame: Frame) {
        let stream = self
            .ctx
            .throttles
            .borrow()
            .get(&stream_id)
            .and_then(|stream| stream.upgrade());
        match stream {
            Some(stream) => {
                stream.borrow_mut().handle_throttle(frame);
                if stream.borrow().is_closed() {
                    self.ctx.throttles.borrow_mut().remove(&stream_id);
                }
            }
            None => {
                // Throttle traffic for a stream that already went away;
                // cancellation is idempotent.
                self.ctx.throttles.borrow_mut().remove(&stream_id);
                trace!("throttle frame for defunct stream {}", stream_id);
            }
        }
    }

    /// One reactor turn bounded by `timeout`; returns the work count.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let work_count = self.ctx.poller.poll_once(timeout)?;
        self.ctx.sweep();
        Ok(work_count)
    }

    fn write_stream(&self, stream_id: u64) -> Option<Rc<RefCell<WriteStream<TcpStream>>>> {
        self.ctx.write_streams.borrow().get(&stream_id).cloned()
    }

    fn reap(&self, stream_id: u64, stream: &Rc<RefCell<WriteStream<TcpStream>>>) {
        if stream.borrow().is_closed() {
            self.ctx.write_streams.borrow_mut().remove(&stream_id);
        }
    }
}

fn unknown_route(source: &str, reference: u64) -> Error {
    Error::UnknownRoute {
        source: source.to_string(),
        reference,
    }
}
