//! In-memory register window with a simulated PSC on the far side.

use std::collections::VecDeque;
use std::io;

use log::trace;

use crate::header::{segments, Segment};
use crate::port::{check_offset, RegisterPort};
use crate::regs::*;

/// Simulated mailbox hardware.
///
/// Writing `IN_VALID` makes a responsive device capture the IN buffer and
/// clear the bit; writing `OUT_DONE` retires the current OUT segment and
/// posts the next queued one.
pub struct SimPort {
    regs: Vec<u32>,
    responsive: bool,
    loopback: bool,
    submitted: Vec<Segment>,
    pending_out: VecDeque<Segment>,
    inbound: Vec<u8>,
    acks: usize,
}

impl SimPort {
    /// A device that consumes every submitted segment.
    pub fn new() -> Self {
        SimPort {
            regs: vec![0; MBOX_MAP_SIZE / 4],
            responsive: true,
            loopback: false,
            submitted: Vec::new(),
            pending_out: VecDeque::new(),
            inbound: Vec::new(),
            acks: 0,
        }
    }

    /// A device that never clears `IN_VALID`.
    pub fn stalled() -> Self {
        SimPort {
            responsive: false,
            ..Self::new()
        }
    }

    /// A device that answers every completed message with the same bytes.
    pub fn loopback() -> Self {
        SimPort {
            loopback: true,
            ..Self::new()
        }
    }

    /// Segments the device has consumed from IN, in order.
    pub fn submitted(&self) -> &[Segment] {
        &self.submitted
    }

    /// Number of `OUT_DONE` acknowledgements seen.
    pub fn acks(&self) -> usize {
        self.acks
    }

    pub fn out_valid(&self) -> bool {
        self.reg(PSC_CTRL) & PSC_CTRL_OUT_VALID != 0
    }

    /// OUT segments queued behind the one currently posted.
    pub fn pending(&self) -> usize {
        self.pending_out.len()
    }

    /// Raw register value, without side effects.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not a word offset inside the mailbox window.
    pub fn reg(&self, offset: usize) -> u32 {
        assert!(
            check_offset(offset).is_ok(),
            "register offset 0x{:x} outside mailbox window",
            offset
        );
        self.regs[offset / 4]
    }

    /// Queue a single segment from the device.
    pub fn push_segment(&mut self, segment: Segment) {
        self.pending_out.push_back(segment);
        self.post_next();
    }

    /// Queue every segment of a logical message from the device.
    pub fn push_message(&mut self, opcode: u32, context: crate::Context, payload: &[u8]) {
        for segment in segments(opcode, context, payload) {
            self.push_segment(segment);
        }
    }

    fn post_next(&mut self) {
        if self.out_valid() {
            return;
        }
        if let Some(segment) = self.pending_out.pop_front() {
            let base = OUT_BUF / 4;
            self.regs[base..base + MBOX_BUF_WORDS].copy_from_slice(&segment.words);
            self.regs[PSC_CTRL / 4] |= PSC_CTRL_OUT_VALID;
        }
    }

    fn consume_in(&mut self) {
        let base = IN_BUF / 4;
        let mut words = [0u32; MBOX_BUF_WORDS];
        words.copy_from_slice(&self.regs[base..base + MBOX_BUF_WORDS]);
        let segment = Segment::from_words(words);
        trace!("sim: consumed {:?}", segment.header);

        if self.loopback {
            let header = segment.header;
            if usize::from(header.offset) != self.inbound.len() {
                self.inbound.clear();
            }
            self.inbound.extend(segment.payload());
            if !header.more {
                let message = std::mem::take(&mut self.inbound);
                self.push_message(header.opcode, header.context, &message);
            }
        }
        self.submitted.push(segment);
    }

    fn write_ext_ctrl(&mut self, value: u32) {
        self.regs[EXT_CTRL / 4] = value;

        if value & EXT_CTRL_OUT_DONE != 0 {
            self.acks += 1;
            self.regs[EXT_CTRL / 4] &= !EXT_CTRL_OUT_DONE;
            self.regs[PSC_CTRL / 4] &= !PSC_CTRL_OUT_VALID;
            self.post_next();
        }

        if value & EXT_CTRL_IN_VALID != 0 && self.responsive {
            self.consume_in();
            self.regs[EXT_CTRL / 4] &= !EXT_CTRL_IN_VALID;
        }
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPort for SimPort {
    fn read_word(&mut self, offset: usize) -> io::Result<u32> {
        check_offset(offset)?;
        Ok(self.regs[offset / 4])
    }

    fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()> {
        check_offset(offset)?;
        if offset == EXT_CTRL {
            self.write_ext_ctrl(value);
        } else {
            self.regs[offset / 4] = value;
        }
        Ok(())
    }
}
