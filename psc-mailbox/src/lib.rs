//! # PSC Mailbox
//!
//! Segmented message transport over the PSC register mailbox.
//!
//! ## Register Window
//!
//! ```text
//! 0x0004  EXT_CTRL   bit0 IN_VALID, bit4 OUT_DONE   (client -> PSC)
//! 0x0008  PSC_CTRL   bit0 OUT_VALID                 (PSC -> client)
//! 0x0800  IN[16]     client -> PSC segment
//! 0x1000  OUT[16]    PSC -> client segment
//! ```
//!
//! ## Segment Format
//!
//! ```text
//! word0     opcode
//! word1     offset:16 | len:8 | more:1 | context:3 | reserved:4
//! word2-15  payload (up to 56 bytes, low byte first)
//! ```
//!
//! A logical message longer than 56 bytes is sent as a sequence of segments
//! with increasing offsets; every segment but the last has `more` set.

mod clock;
mod header;
pub mod port;
pub mod regs;
pub mod sim;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use header::{segments, Context, Segment, SegmentHeader};
pub use port::{open_port, Backend, PortConfig, PortError, RegisterPort};
pub use transport::{
    Mailbox, MailboxError, MailboxTransport, Received, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
    MAX_MESSAGE_LEN,
};

/// Mailbox opcode carrying SPDM messages ("SPDM").
pub const SPDM_OPCODE: u32 = 0x5350_444D;
