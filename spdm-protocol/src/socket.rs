//! Blocking TCP listener and connection for the platform protocol.

use std::io::{BufReader, BufWriter};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::{Frame, ProtocolError};

/// Default platform port of spdm-emu
pub const DEFAULT_PORT: u16 = 2323;

/// A listening socket that accepts platform connections
pub struct SocketListener {
    inner: TcpListener,
}

impl SocketListener {
    /// Bind to `port` on all IPv4 interfaces.
    ///
    /// The standard library sets `SO_REUSEADDR` on Unix, so a restarted
    /// server can rebind while old connections sit in TIME_WAIT.
    pub fn bind(port: u16) -> Result<Self, std::io::Error> {
        let inner = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        Ok(SocketListener { inner })
    }

    /// Accept a new connection (blocking)
    pub fn accept(&self) -> Result<(SocketConnection, SocketAddr), std::io::Error> {
        let (stream, peer) = self.inner.accept()?;
        Ok((SocketConnection::from_tcp(stream)?, peer))
    }

    /// Get the address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// A connection to a platform peer
pub struct SocketConnection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl SocketConnection {
    fn from_tcp(stream: TcpStream) -> Result<Self, std::io::Error> {
        // Disable Nagle's algorithm, frames are small and strictly request/response
        let _ = stream.set_nodelay(true);
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(SocketConnection { reader, writer })
    }

    /// Connect to a platform server
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr)?;
        Self::from_tcp(stream)
    }

    /// Set read timeout
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> Result<(), std::io::Error> {
        self.reader.get_ref().set_read_timeout(dur)
    }

    /// Send a frame
    pub fn send(&mut self, frame: &Frame, transport_type: u32) -> Result<(), ProtocolError> {
        frame.write_to(&mut self.writer, transport_type)
    }

    /// Receive a frame (blocking)
    pub fn recv(&mut self, transport_type: u32, max_len: usize) -> Result<Frame, ProtocolError> {
        Frame::read_from(&mut self.reader, transport_type, max_len)
    }

    /// Shutdown the connection
    pub fn shutdown(&self) -> Result<(), std::io::Error> {
        self.writer.get_ref().shutdown(Shutdown::Both)
    }
}
