//! Segment header packing and segment buffer images.

use crate::regs::{HEADER_WORDS, MBOX_BUF_WORDS, SEGMENT_PAYLOAD_MAX};
use crate::transport::MAX_MESSAGE_LEN;

const OFFSET_MASK: u32 = 0xFFFF;
const LEN_SHIFT: u32 = 16;
const LEN_MASK: u32 = 0xFF;
const MORE_SHIFT: u32 = 24;
const CONTEXT_SHIFT: u32 = 25;
const CONTEXT_MASK: u32 = 0x7;

/// Stream discriminator carried in every segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Context(u8);

impl Context {
    pub const DEFAULT: Context = Context(0);
    pub const MAX: u8 = CONTEXT_MASK as u8;

    /// Returns `None` if `id` does not fit the 3-bit header field.
    pub const fn new(id: u8) -> Option<Context> {
        if id <= Self::MAX {
            Some(Context(id))
        } else {
            None
        }
    }

    pub const fn id(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two header words at the start of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub opcode: u32,
    /// Byte offset of this segment's payload in the logical message.
    pub offset: u16,
    /// Payload bytes in this segment.
    pub len: u8,
    /// More segments follow.
    pub more: bool,
    pub context: Context,
}

impl SegmentHeader {
    pub fn pack(&self) -> [u32; HEADER_WORDS] {
        let mut word1 = u32::from(self.offset)
            | (u32::from(self.len) & LEN_MASK) << LEN_SHIFT
            | (u32::from(self.context.0) & CONTEXT_MASK) << CONTEXT_SHIFT;
        if self.more {
            word1 |= 1 << MORE_SHIFT;
        }
        [self.opcode, word1]
    }

    /// Reserved bits 28-31 of word1 are ignored.
    pub fn unpack(words: [u32; HEADER_WORDS]) -> SegmentHeader {
        let word1 = words[1];
        SegmentHeader {
            opcode: words[0],
            offset: (word1 & OFFSET_MASK) as u16,
            len: ((word1 >> LEN_SHIFT) & LEN_MASK) as u8,
            more: (word1 >> MORE_SHIFT) & 1 != 0,
            context: Context(((word1 >> CONTEXT_SHIFT) & CONTEXT_MASK) as u8),
        }
    }

    /// Number of 32-bit words the payload occupies on the wire.
    pub fn payload_words(&self) -> usize {
        (usize::from(self.len) + 3) / 4
    }
}

/// A complete mailbox buffer image: header plus zero padded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub words: [u32; MBOX_BUF_WORDS],
}

impl Segment {
    /// Build the segment for `chunk`.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is longer than `SEGMENT_PAYLOAD_MAX` bytes.
    pub fn new(opcode: u32, context: Context, offset: u16, chunk: &[u8], more: bool) -> Segment {
        assert!(chunk.len() <= SEGMENT_PAYLOAD_MAX);
        let header = SegmentHeader {
            opcode,
            offset,
            len: chunk.len() as u8,
            more,
            context,
        };
        let mut words = [0u32; MBOX_BUF_WORDS];
        words[..HEADER_WORDS].copy_from_slice(&header.pack());
        for (word, bytes) in words[HEADER_WORDS..].iter_mut().zip(chunk.chunks(4)) {
            let mut le = [0u8; 4];
            le[..bytes.len()].copy_from_slice(bytes);
            *word = u32::from_le_bytes(le);
        }
        Segment { header, words }
    }

    /// Parse a buffer image read back from the mailbox.
    pub fn from_words(words: [u32; MBOX_BUF_WORDS]) -> Segment {
        let header = SegmentHeader::unpack([words[0], words[1]]);
        Segment { header, words }
    }

    /// Header words followed by the payload words that carry data.
    pub fn wire_words(&self) -> &[u32] {
        &self.words[..HEADER_WORDS + self.header.payload_words()]
    }

    /// Payload bytes, with the padding of a trailing partial word dropped.
    pub fn payload(&self) -> Vec<u8> {
        let len = usize::from(self.header.len).min(SEGMENT_PAYLOAD_MAX);
        self.words[HEADER_WORDS..]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .take(len)
            .collect()
    }
}

/// Split a logical message into the segments that carry it.
///
/// # Panics
///
/// Panics if `payload` is longer than the 16-bit offset field can address.
pub fn segments(opcode: u32, context: Context, payload: &[u8]) -> impl Iterator<Item = Segment> + '_ {
    assert!(
        payload.len() <= MAX_MESSAGE_LEN,
        "message of {} bytes exceeds the segment offset range",
        payload.len()
    );
    let count = payload.chunks(SEGMENT_PAYLOAD_MAX).count();
    payload
        .chunks(SEGMENT_PAYLOAD_MAX)
        .enumerate()
        .map(move |(i, chunk)| {
            let offset = (i * SEGMENT_PAYLOAD_MAX) as u16;
            Segment::new(opcode, context, offset, chunk, i + 1 < count)
        })
}
