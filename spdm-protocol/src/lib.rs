//! # SPDM Platform Protocol
//!
//! The socket framing spoken by the spdm-emu requester and responder
//! platform layers.
//!
//! ## Wire Format
//!
//! All integers are big-endian:
//! ```text
//! [command:u32][transport_type:u32][len:u32][payload...]
//! ```
//!
//! ## Commands
//!
//! | Code | Name | Payload |
//! |------|------|---------|
//! | 0x0001 | NORMAL | transport encapsulated SPDM message |
//! | 0x8001 | OOB_ENCAP_KEY_UPDATE | empty |
//! | 0xFFFD | CONTINUE | empty |
//! | 0xFFFE | SHUTDOWN | empty |
//! | 0xFFFF | UNKNOWN | empty |
//! | 0xDEAD | TEST | free form |

mod messages;
pub mod socket;

pub use messages::{
    parse_transport, Command, Frame, ProtocolError, TRANSPORT_MCTP, TRANSPORT_NONE,
    TRANSPORT_PCI_DOE,
};
pub use socket::{SocketConnection, SocketListener};
