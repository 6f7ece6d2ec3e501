//! PSC mailbox register map (MB5, ARM non-secure view).

/// Physical base of the mailbox window.
pub const MBOX_BASE: u64 = 0x1206_0000;

/// Size of the register window in bytes.
pub const MBOX_MAP_SIZE: usize = 0x10000;

/// External (client) control register.
pub const EXT_CTRL: usize = 0x4;
/// Client posted a segment in IN; cleared by hardware once consumed.
pub const EXT_CTRL_IN_VALID: u32 = 1 << 0;
/// Client finished reading the segment in OUT.
pub const EXT_CTRL_OUT_DONE: u32 = 1 << 4;

/// PSC control register.
pub const PSC_CTRL: usize = 0x8;
/// PSC posted a segment in OUT.
pub const PSC_CTRL_OUT_VALID: u32 = 1 << 0;

/// Client -> PSC segment buffer.
pub const IN_BUF: usize = 0x800;
/// PSC -> client segment buffer.
pub const OUT_BUF: usize = 0x1000;

/// Words per segment buffer.
pub const MBOX_BUF_WORDS: usize = 16;
/// Bytes per segment buffer.
pub const MBOX_BUF_BYTES: usize = MBOX_BUF_WORDS * 4;

/// Header words at the start of every segment.
pub const HEADER_WORDS: usize = 2;
/// Payload bytes a single segment can carry.
pub const SEGMENT_PAYLOAD_MAX: usize = (MBOX_BUF_WORDS - HEADER_WORDS) * 4;
