//! Per-connection stream state machines and their wiring

use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

mod client;
mod context;
mod correlation;
mod read_stream;
mod server;
mod write_stream;

#[cfg(test)]
mod stream_test;

pub(crate) use client::on_connected;
pub(crate) use context::StreamContext;
pub use correlation::{Correlation, Correlations};
pub use read_stream::ReadStream;
pub(crate) use server::{on_accepted, on_reply_begin};
pub use write_stream::{WriteStream, WRITE_SPIN_COUNT};

/// The seam between a stream state machine and the OS socket.
///
/// Implemented for [mio::net::TcpStream]; tests layer scripted decorators
/// over it to force partial and zero-length writes deterministically.
pub trait StreamChannel: Source {
    /// Reads into `buf`, non-blocking.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Writes from `buf`, non-blocking.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Half-closes the write direction, sending FIN.
    fn shutdown_output(&mut self) -> io::Result<()>;
    /// Arms `SO_LINGER(0)` so the eventual close sends RST instead of FIN.
    fn set_immediate_reset(&mut self) -> io::Result<()>;
    /// Takes a pending socket error, e.g. an asynchronous connect failure.
    fn take_error(&mut self) -> io::Result<Option<io::Error>>;
    /// Local endpoint of the connection.
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// Remote endpoint of the connection.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl StreamChannel for mio::net::TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(self, buf)
    }

    fn shutdown_output(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }

    fn set_immediate_reset(&mut self) -> io::Result<()> {
        socket2::SockRef::from(&*self).set_linger(Some(std::time::Duration::from_secs(0)))
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::peer_addr(self)
    }
}

/// Holds the socket of one connection until teardown.
///
/// Both stream halves and the poller key share one cell; closing is a
/// deterministic `take()` of the inner channel, which drops the descriptor
/// immediately regardless of how many handles remain.
pub struct ChannelCell<C> {
    channel: Option<C>,
}

/// Shared handle to a [ChannelCell].
pub type SharedChannel<C> = Rc<RefCell<ChannelCell<C>>>;

impl<C> ChannelCell<C> {
    /// Wraps `channel` into a shared cell.
    pub fn new(channel: C) -> SharedChannel<C> {
        Rc::new(RefCell::new(Self {
            channel: Some(channel),
        }))
    }

    /// Whether the socket is still held.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Drops the socket, closing it. FIN or RST depends on linger state.
    pub fn close(&mut self) {
        self.channel = None;
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel closed")
}

impl<C: StreamChannel> ChannelCell<C> {
    /// Reads from the socket; `NotConnected` once closed.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.as_mut().ok_or_else(closed)?.read(buf)
    }

    /// Writes to the socket; `NotConnected` once closed.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.as_mut().ok_or_else(closed)?.write(buf)
    }

    /// Half-closes the write direction.
    pub fn shutdown_output(&mut self) -> io::Result<()> {
        self.channel.as_mut().ok_or_else(closed)?.shutdown_output()
    }

    /// Abortive close: arm linger-0, then drop the socket so RST goes out now.
    pub fn abort(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.set_immediate_reset() {
                log::trace!("set linger for abort: {}", e);
            }
        }
        self.channel = None;
    }

    /// Takes a pending socket error.
    pub fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        self.channel.as_mut().ok_or_else(closed)?.take_error()
    }

    /// Local endpoint of the connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.as_ref().ok_or_else(closed)?.local_addr()
    }

    /// Remote endpoint of the connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.channel.as_ref().ok_or_else(closed)?.peer_addr()
    }
}

impl<C: Source> Source for ChannelCell<C> {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.register(registry, token, interests),
            None => Ok(()),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.reregister(registry, token, interests),
            None => Ok(()),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.deregister(registry),
            None => Ok(()),
        }
    }
}
