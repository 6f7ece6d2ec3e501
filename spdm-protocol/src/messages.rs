//! Frame types and encoding/decoding for the platform socket protocol.

use std::io::{Read, Write};

use thiserror::Error;

/// Raw packets, no transport encapsulation.
pub const TRANSPORT_NONE: u32 = 0;
/// MCTP encapsulated payloads.
pub const TRANSPORT_MCTP: u32 = 1;
/// PCI DOE encapsulated payloads.
pub const TRANSPORT_PCI_DOE: u32 = 2;

/// Command code constants
mod command {
    pub const NORMAL: u32 = 0x0001;
    pub const OOB_ENCAP_KEY_UPDATE: u32 = 0x8001;
    pub const CONTINUE: u32 = 0xFFFD;
    pub const SHUTDOWN: u32 = 0xFFFE;
    pub const UNKNOWN: u32 = 0xFFFF;
    pub const TEST: u32 = 0xDEAD;
}

/// Protocol error types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    /// Peer closed the connection mid-frame or between frames
    #[error("Connection closed")]
    ConnectionClosed,
    /// Transport type tag differs from the configured one
    #[error("Transport type mismatch: expected 0x{expected:x}, got 0x{found:x}")]
    TransportMismatch { expected: u32, found: u32 },
    /// Declared payload length exceeds the receive buffer
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    }
}

/// Platform command carried in the first word of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// SPDM message to relay to the responder
    Normal,
    /// Out-of-band encapsulated KEY_UPDATE trigger
    OobEncapKeyUpdate,
    /// End of this session, more may follow
    Continue,
    /// Requester is done
    Shutdown,
    /// Reply to a command the peer does not understand
    Unknown,
    /// Connectivity check
    Test,
    /// Any other code
    Other(u32),
}

impl Command {
    pub fn from_code(code: u32) -> Command {
        match code {
            command::NORMAL => Command::Normal,
            command::OOB_ENCAP_KEY_UPDATE => Command::OobEncapKeyUpdate,
            command::CONTINUE => Command::Continue,
            command::SHUTDOWN => Command::Shutdown,
            command::UNKNOWN => Command::Unknown,
            command::TEST => Command::Test,
            other => Command::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Command::Normal => command::NORMAL,
            Command::OobEncapKeyUpdate => command::OOB_ENCAP_KEY_UPDATE,
            Command::Continue => command::CONTINUE,
            Command::Shutdown => command::SHUTDOWN,
            Command::Unknown => command::UNKNOWN,
            Command::Test => command::TEST,
            Command::Other(code) => code,
        }
    }
}

/// Parse a transport type name or number.
pub fn parse_transport(s: &str) -> Result<u32, String> {
    match s {
        "none" => Ok(TRANSPORT_NONE),
        "mctp" => Ok(TRANSPORT_MCTP),
        "pci-doe" | "doe" => Ok(TRANSPORT_PCI_DOE),
        other => {
            let parsed = match other.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => other.parse(),
            };
            parsed.map_err(|_| format!("unknown transport type '{}'", other))
        }
    }
}

/// One request or response on the platform socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Frame { command, payload }
    }

    /// A frame without payload
    pub fn empty(command: Command) -> Self {
        Frame::new(command, Vec::new())
    }

    /// Encode frame to wire format
    pub fn encode(&self, transport_type: u32) -> Vec<u8> {
        let mut result = Vec::with_capacity(12 + self.payload.len());
        result.extend(&self.command.code().to_be_bytes());
        result.extend(&transport_type.to_be_bytes());
        result.extend(&(self.payload.len() as u32).to_be_bytes());
        result.extend(&self.payload);
        result
    }

    /// Write frame to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W, transport_type: u32) -> Result<(), ProtocolError> {
        writer.write_all(&self.encode(transport_type))?;
        writer.flush()?;
        Ok(())
    }

    /// Read frame from a reader, rejecting foreign transport tags and
    /// payloads longer than `max_len`.
    pub fn read_from<R: Read>(
        reader: &mut R,
        transport_type: u32,
        max_len: usize,
    ) -> Result<Frame, ProtocolError> {
        let command = Command::from_code(read_u32(reader)?);

        let found = read_u32(reader)?;
        if found != transport_type {
            return Err(ProtocolError::TransportMismatch {
                expected: transport_type,
                found,
            });
        }

        let len = read_u32(reader)? as usize;
        if len > max_len {
            return Err(ProtocolError::PayloadTooLarge { len, max: max_len });
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(Frame { command, payload })
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
