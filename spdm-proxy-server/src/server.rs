//! Platform server relaying spdm-emu requests to the PSC

use log::{debug, info, warn};
use psc_mailbox::{Context, Mailbox, MailboxError, SPDM_OPCODE};
use spdm_protocol::socket::DEFAULT_PORT;
use spdm_protocol::{Command, Frame, ProtocolError, SocketConnection, SocketListener, TRANSPORT_MCTP};
use std::net::SocketAddr;
use std::time::Duration;

/// Receive buffer capacity, the largest SPDM message plus transport header room.
pub const MAX_PAYLOAD: usize = 0x1200 + 64;

/// Payload of the TEST acknowledgement, NUL included.
pub const TEST_RESPONSE: &[u8] = b"Server Hello!\0";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Transport tag both ends must agree on
    pub transport_type: u32,
    /// Largest request and response payload
    pub max_payload: usize,
    /// Mailbox opcode NORMAL payloads travel under
    pub opcode: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            transport_type: TRANSPORT_MCTP,
            max_payload: MAX_PAYLOAD,
            opcode: SPDM_OPCODE,
        }
    }
}

/// Why a connection ended
#[derive(Debug)]
pub enum Termination {
    /// Peer closed the socket between frames
    PeerClosed,
    /// Malformed request, foreign transport tag or short read
    Framing(ProtocolError),
    /// A command that ends the session was answered
    Command(Command),
    /// The mailbox exchange for a NORMAL request failed
    Mailbox(MailboxError),
    /// The PSC answered with an empty message
    EmptyResponse,
    /// Writing the response failed
    WriteFailed(ProtocolError),
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::PeerClosed => write!(f, "peer closed connection"),
            Termination::Framing(e) => write!(f, "framing error: {}", e),
            Termination::Command(cmd) => write!(f, "{:?} command", cmd),
            Termination::Mailbox(e) => write!(f, "mailbox error: {}", e),
            Termination::EmptyResponse => write!(f, "empty mailbox response"),
            Termination::WriteFailed(e) => write!(f, "send error: {}", e),
        }
    }
}

/// What to do after a request has been dispatched
#[derive(Debug)]
pub enum Reply {
    /// Send the frame and wait for the next request
    Continue(Frame),
    /// Send the frame, then close the connection
    Final(Frame, Termination),
    /// Close the connection without responding
    Abort(Termination),
}

/// Sequential platform server: one connection at a time, each served until
/// it ends.
pub struct ProxyServer<M> {
    listener: SocketListener,
    mailbox: M,
    config: ServerConfig,
    buffer: Vec<u8>,
}

impl<M: Mailbox> ProxyServer<M> {
    pub fn bind(config: ServerConfig, mailbox: M) -> std::io::Result<Self> {
        let listener = SocketListener::bind(config.port)?;
        Ok(ProxyServer {
            listener,
            mailbox,
            buffer: vec![0u8; config.max_payload],
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    /// Run the accept loop
    pub fn run(&mut self) -> ! {
        loop {
            info!("Platform server listening on port {}", self.config.port);
            if let Err(e) = self.serve_next() {
                warn!("Accept error: {}", e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    /// Accept one connection and serve it to completion
    pub fn serve_next(&mut self) -> std::io::Result<Termination> {
        let (mut conn, peer) = self.listener.accept()?;
        info!("Client accepted from {}", peer);

        let termination = self.handle_connection(&mut conn);
        match &termination {
            Termination::PeerClosed | Termination::Command(_) => {
                info!("Connection from {} closed: {}", peer, termination)
            }
            _ => warn!("Connection from {} closed: {}", peer, termination),
        }
        let _ = conn.shutdown();
        Ok(termination)
    }

    /// Serve requests on `conn` until one ends the session
    pub fn handle_connection(&mut self, conn: &mut SocketConnection) -> Termination {
        let transport_type = self.config.transport_type;
        loop {
            let frame = match conn.recv(transport_type, self.config.max_payload) {
                Ok(frame) => frame,
                Err(ProtocolError::ConnectionClosed) => return Termination::PeerClosed,
                Err(e) => return Termination::Framing(e),
            };
            debug!("<- {:?} ({} bytes)", frame.command, frame.payload.len());

            let (response, end) = match self.dispatch(frame) {
                Reply::Continue(response) => (response, None),
                Reply::Final(response, why) => (response, Some(why)),
                Reply::Abort(why) => return why,
            };

            debug!("-> {:?} ({} bytes)", response.command, response.payload.len());
            if let Err(e) = conn.send(&response, transport_type) {
                return Termination::WriteFailed(e);
            }
            if let Some(why) = end {
                return why;
            }
        }
    }

    /// Decide the response to a single request
    pub fn dispatch(&mut self, frame: Frame) -> Reply {
        match frame.command {
            Command::Test => Reply::Continue(Frame::new(Command::Test, TEST_RESPONSE.to_vec())),
            Command::OobEncapKeyUpdate => Reply::Continue(Frame::empty(Command::OobEncapKeyUpdate)),
            Command::Shutdown => Reply::Final(
                Frame::empty(Command::Shutdown),
                Termination::Command(Command::Shutdown),
            ),
            Command::Continue => Reply::Final(
                Frame::empty(Command::Continue),
                Termination::Command(Command::Continue),
            ),
            Command::Normal => self.relay(&frame.payload),
            other => {
                warn!("Unrecognized platform interface command 0x{:x}", other.code());
                Reply::Final(Frame::empty(Command::Unknown), Termination::Command(other))
            }
        }
    }

    fn relay(&mut self, request: &[u8]) -> Reply {
        let opcode = self.config.opcode;
        if let Err(e) = self.mailbox.send(opcode, Context::DEFAULT, request) {
            return Reply::Abort(Termination::Mailbox(e));
        }

        match self.mailbox.receive(opcode, None, &mut self.buffer) {
            Ok(received) if received.len == 0 => Reply::Abort(Termination::EmptyResponse),
            Ok(received) => {
                debug!("PSC replied {} bytes on context {}", received.len, received.context);
                Reply::Continue(Frame::new(Command::Normal, self.buffer[..received.len].to_vec()))
            }
            Err(e) => Reply::Abort(Termination::Mailbox(e)),
        }
    }
}
