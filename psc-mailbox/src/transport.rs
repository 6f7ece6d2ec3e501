//! Segmented send/receive over the mailbox control handshake.

use std::io;
use std::time::Duration;

use log::{trace, warn};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::header::{Context, Segment, SegmentHeader};
use crate::port::RegisterPort;
use crate::regs::*;

/// Budget for one complete multi-segment exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Back-off between unsuccessful control register polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Longest message addressable by the 16-bit segment offset.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("empty payload")]
    EmptyPayload,
    #[error("receive buffer has no capacity")]
    NoBuffer,
    #[error("payload of {0} bytes does not fit the segment offset field")]
    PayloadTooLarge(usize),
    #[error("timed out after {elapsed:?} ({transferred} bytes transferred)")]
    Timeout {
        elapsed: Duration,
        transferred: usize,
    },
    #[error("opcode changed: expected 0x{expected:08x}, got 0x{found:08x}")]
    OpcodeMismatch { expected: u32, found: u32 },
    #[error("context mismatch: expected {expected}, got {found}")]
    ContextMismatch { expected: Context, found: Context },
    #[error("invalid segment length {0}")]
    InvalidLength(u8),
    #[error("segment of {len} bytes at offset {offset} overflows {capacity} byte buffer")]
    Overflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("segment length {0} is not word aligned but more segments follow")]
    Misaligned(u8),
    #[error("offset mismatch: expected {expected}, got {found}")]
    OffsetMismatch { expected: usize, found: u16 },
    #[error("register access failed: {0}")]
    Register(#[from] io::Error),
}

/// Outcome of a successful receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes written to the caller's buffer.
    pub len: usize,
    /// Context the message arrived on.
    pub context: Context,
}

/// Message level access to the PSC mailbox.
pub trait Mailbox {
    fn send(&mut self, opcode: u32, context: Context, payload: &[u8]) -> Result<(), MailboxError>;

    /// Receive one message into `buf`. With `context` unset the first
    /// segment's context is adopted.
    fn receive(
        &mut self,
        opcode: u32,
        context: Option<Context>,
        buf: &mut [u8],
    ) -> Result<Received, MailboxError>;
}

/// Mailbox state machine over a register port.
pub struct MailboxTransport<P, C = SystemClock> {
    port: P,
    clock: C,
    timeout: Duration,
    poll_interval: Duration,
}

impl<P: RegisterPort> MailboxTransport<P, SystemClock> {
    pub fn new(port: P) -> Self {
        Self::with_clock(port, SystemClock)
    }
}

impl<P: RegisterPort, C: Clock> MailboxTransport<P, C> {
    pub fn with_clock(port: P, clock: C) -> Self {
        MailboxTransport {
            port,
            clock,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// Send `payload` as one logical message.
    ///
    /// Segments already handed to the hardware are not withdrawn when the
    /// deadline passes; the peer's session must be reset by the caller.
    pub fn send_timeout(
        &mut self,
        opcode: u32,
        context: Context,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), MailboxError> {
        let result = self.try_send(opcode, context, payload, timeout);
        if let Err(e) = &result {
            warn!("mailbox send failed: {}", e);
        }
        result
    }

    /// Receive one logical message into `buf`.
    pub fn receive_timeout(
        &mut self,
        opcode: u32,
        context: Option<Context>,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Received, MailboxError> {
        let result = self.try_receive(opcode, context, buf, timeout);
        if let Err(e) = &result {
            warn!("mailbox receive failed: {}", e);
        }
        result
    }

    fn try_send(
        &mut self,
        opcode: u32,
        context: Context,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), MailboxError> {
        if payload.is_empty() {
            return Err(MailboxError::EmptyPayload);
        }
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(MailboxError::PayloadTooLarge(payload.len()));
        }

        let start = self.clock.now();
        let mut sent = 0;

        while sent < payload.len() {
            let elapsed = self.clock.now().duration_since(start);
            if elapsed > timeout {
                return Err(MailboxError::Timeout {
                    elapsed,
                    transferred: sent,
                });
            }

            // Hardware clears IN_VALID once it has taken the previous segment.
            if self.port.read_word(EXT_CTRL)? & EXT_CTRL_IN_VALID != 0 {
                self.clock.sleep(self.poll_interval);
                continue;
            }

            let len = (payload.len() - sent).min(SEGMENT_PAYLOAD_MAX);
            let more = sent + len < payload.len();
            let segment = Segment::new(opcode, context, sent as u16, &payload[sent..sent + len], more);
            trace!("mailbox tx {:?}", segment.header);

            for (i, word) in segment.wire_words().iter().enumerate() {
                self.port.write_word(IN_BUF + 4 * i, *word)?;
            }
            self.port.sync(IN_BUF, MBOX_BUF_BYTES);

            let ctrl = self.port.read_word(EXT_CTRL)?;
            self.port.write_word(EXT_CTRL, ctrl | EXT_CTRL_IN_VALID)?;
            self.port.sync(IN_BUF, MBOX_BUF_BYTES);

            sent += len;
        }

        Ok(())
    }

    fn try_receive(
        &mut self,
        opcode: u32,
        context: Option<Context>,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Received, MailboxError> {
        if buf.is_empty() {
            return Err(MailboxError::NoBuffer);
        }

        let start = self.clock.now();
        let mut context = context;
        let mut offset = 0;

        loop {
            let elapsed = self.clock.now().duration_since(start);
            if elapsed > timeout {
                return Err(MailboxError::Timeout {
                    elapsed,
                    transferred: offset,
                });
            }

            if self.port.read_word(PSC_CTRL)? & PSC_CTRL_OUT_VALID == 0 {
                self.clock.sleep(self.poll_interval);
                continue;
            }

            // Left unacknowledged: it belongs to some other exchange.
            let found = self.port.read_word(OUT_BUF)?;
            if found != opcode {
                return Err(MailboxError::OpcodeMismatch {
                    expected: opcode,
                    found,
                });
            }

            let header = SegmentHeader::unpack([found, self.port.read_word(OUT_BUF + 4)?]);
            trace!("mailbox rx {:?}", header);

            let expected = *context.get_or_insert(header.context);
            if header.context != expected {
                self.out_done()?;
                return Err(MailboxError::ContextMismatch {
                    expected,
                    found: header.context,
                });
            }

            if let Err(e) = check_segment(&header, offset, buf.len()) {
                self.out_done()?;
                return Err(e);
            }

            // A zero offset starts a new message, which a later receive may
            // still pick up. Anything else is stale and gets dropped.
            if usize::from(header.offset) != offset {
                if header.offset != 0 {
                    self.out_done()?;
                }
                return Err(MailboxError::OffsetMismatch {
                    expected: offset,
                    found: header.offset,
                });
            }

            let len = usize::from(header.len);
            let dest = &mut buf[offset..offset + len];
            for (i, chunk) in dest.chunks_mut(4).enumerate() {
                let word = self.port.read_word(OUT_BUF + 4 * (HEADER_WORDS + i))?;
                chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
            }
            offset += len;

            self.out_done()?;

            if !header.more {
                return Ok(Received {
                    len: offset,
                    context: expected,
                });
            }
        }
    }

    fn out_done(&mut self) -> Result<(), MailboxError> {
        let ctrl = self.port.read_word(EXT_CTRL)?;
        self.port.write_word(EXT_CTRL, ctrl | EXT_CTRL_OUT_DONE)?;
        Ok(())
    }
}

fn check_segment(header: &SegmentHeader, offset: usize, capacity: usize) -> Result<(), MailboxError> {
    let len = usize::from(header.len);
    if len == 0 || len > SEGMENT_PAYLOAD_MAX {
        return Err(MailboxError::InvalidLength(header.len));
    }
    if offset + len > capacity {
        return Err(MailboxError::Overflow {
            offset,
            len,
            capacity,
        });
    }
    if header.more && len % 4 != 0 {
        return Err(MailboxError::Misaligned(header.len));
    }
    Ok(())
}

impl<P: RegisterPort, C: Clock> Mailbox for MailboxTransport<P, C> {
    fn send(&mut self, opcode: u32, context: Context, payload: &[u8]) -> Result<(), MailboxError> {
        self.send_timeout(opcode, context, payload, self.timeout)
    }

    fn receive(
        &mut self,
        opcode: u32,
        context: Option<Context>,
        buf: &mut [u8],
    ) -> Result<Received, MailboxError> {
        self.receive_timeout(opcode, context, buf, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::header::segments;
    use crate::sim::SimPort;
    use proptest::prelude::*;

    const OPCODE: u32 = crate::SPDM_OPCODE;

    fn ctx(id: u8) -> Context {
        Context::new(id).unwrap()
    }

    fn transport(port: SimPort, clock: &ManualClock) -> MailboxTransport<SimPort, &ManualClock> {
        MailboxTransport::with_clock(port, clock)
    }

    /// A segment with an arbitrary header word1 and payload bytes.
    fn raw_segment(opcode: u32, word1: u32, payload: &[u8]) -> Segment {
        let mut words = Segment::new(opcode, Context::DEFAULT, 0, payload, false).words;
        words[1] = word1;
        Segment::from_words(words)
    }

    fn word1(offset: u16, len: u8, more: bool, context: u8) -> u32 {
        SegmentHeader {
            opcode: OPCODE,
            offset,
            len,
            more,
            context: ctx(context),
        }
        .pack()[1]
    }

    #[test]
    fn test_send_single_segment() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        mbox.send(OPCODE, ctx(1), b"hello").unwrap();

        let sim = mbox.into_port();
        assert_eq!(sim.submitted().len(), 1);
        let seg = &sim.submitted()[0];
        assert_eq!(seg.header.opcode, OPCODE);
        assert_eq!(seg.header.offset, 0);
        assert_eq!(seg.header.len, 5);
        assert!(!seg.header.more);
        assert_eq!(seg.header.context, ctx(1));
        assert_eq!(seg.payload(), b"hello");
        assert_eq!(sim.reg(EXT_CTRL) & EXT_CTRL_IN_VALID, 0);
    }

    #[test]
    fn test_send_rejects_empty_payload() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        assert!(matches!(
            mbox.send(OPCODE, Context::DEFAULT, &[]),
            Err(MailboxError::EmptyPayload)
        ));
        assert!(mbox.port().submitted().is_empty());
    }

    #[test]
    fn test_send_rejects_unaddressable_payload() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        let payload = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            mbox.send(OPCODE, Context::DEFAULT, &payload),
            Err(MailboxError::PayloadTooLarge(_))
        ));
        assert!(mbox.port().submitted().is_empty());
    }

    #[test]
    fn test_send_times_out_on_stalled_device() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::stalled(), &clock);

        match mbox.send(OPCODE, Context::DEFAULT, &[1u8; 100]) {
            Err(MailboxError::Timeout {
                elapsed,
                transferred,
            }) => {
                assert!(elapsed > DEFAULT_TIMEOUT);
                assert!(elapsed <= DEFAULT_TIMEOUT + 2 * DEFAULT_POLL_INTERVAL);
                // The first segment went out before the device stopped consuming.
                assert_eq!(transferred, SEGMENT_PAYLOAD_MAX);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(clock.elapsed() > DEFAULT_TIMEOUT);
        assert_eq!(mbox.port().reg(IN_BUF), OPCODE);
    }

    #[test]
    fn test_send_honours_custom_timeout() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::stalled(), &clock).timeout(Duration::from_millis(20));
        assert!(matches!(
            mbox.send(OPCODE, Context::DEFAULT, &[1u8; 60]),
            Err(MailboxError::Timeout { .. })
        ));
        assert!(clock.elapsed() <= Duration::from_millis(22));
    }

    #[test]
    fn test_receive_times_out_when_nothing_posted() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        let mut buf = [0u8; 64];

        match mbox.receive(OPCODE, None, &mut buf) {
            Err(MailboxError::Timeout { elapsed, .. }) => {
                assert!(elapsed > DEFAULT_TIMEOUT);
                assert!(elapsed <= DEFAULT_TIMEOUT + 2 * DEFAULT_POLL_INTERVAL);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_receive_rejects_empty_buffer() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut []),
            Err(MailboxError::NoBuffer)
        ));
    }

    #[test]
    fn test_receive_adopts_first_context() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_message(OPCODE, ctx(6), &[0x5A; 130]);
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 256];
        let received = mbox.receive(OPCODE, None, &mut buf).unwrap();
        assert_eq!(received, Received { len: 130, context: ctx(6) });
        assert!(buf[..130].iter().all(|b| *b == 0x5A));
        assert_eq!(mbox.port().acks(), 3);
        assert!(!mbox.port().out_valid());
    }

    #[test]
    fn test_receive_rejects_interleaved_context() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(Segment::new(OPCODE, ctx(1), 0, &[1u8; 56], true));
        sim.push_segment(Segment::new(OPCODE, ctx(2), 56, &[2u8; 8], false));
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 256];
        match mbox.receive(OPCODE, None, &mut buf) {
            Err(MailboxError::ContextMismatch { expected, found }) => {
                assert_eq!(expected, ctx(1));
                assert_eq!(found, ctx(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mbox.port().acks(), 2);
    }

    #[test]
    fn test_receive_with_fixed_context() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_message(OPCODE, ctx(3), b"abc");
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 16];
        assert!(matches!(
            mbox.receive(OPCODE, Some(ctx(4)), &mut buf),
            Err(MailboxError::ContextMismatch { .. })
        ));
        assert_eq!(mbox.port().acks(), 1);
    }

    #[test]
    fn test_opcode_mismatch_leaves_segment() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_message(0x1234_5678, Context::DEFAULT, b"other");
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 16];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::OpcodeMismatch {
                expected: OPCODE,
                found: 0x1234_5678
            })
        ));
        assert_eq!(mbox.port().acks(), 0);
        assert!(mbox.port().out_valid());

        let received = mbox.receive(0x1234_5678, None, &mut buf).unwrap();
        assert_eq!(&buf[..received.len], b"other");
    }

    #[test]
    fn test_zero_length_segment_dropped() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(raw_segment(OPCODE, word1(0, 0, false, 0), &[]));
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 16];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::InvalidLength(0))
        ));
        assert_eq!(mbox.port().acks(), 1);
        assert!(!mbox.port().out_valid());
    }

    #[test]
    fn test_oversized_segment_dropped() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(raw_segment(OPCODE, word1(0, 57, false, 0), &[0u8; 56]));
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 128];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::InvalidLength(57))
        ));
        assert_eq!(mbox.port().acks(), 1);
    }

    #[test]
    fn test_misaligned_continuation_dropped() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(raw_segment(OPCODE, word1(0, 6, true, 0), &[7u8; 6]));
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 128];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::Misaligned(6))
        ));
        assert_eq!(mbox.port().acks(), 1);
    }

    #[test]
    fn test_message_larger_than_buffer_dropped() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_message(OPCODE, Context::DEFAULT, &[1u8; 20]);
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 10];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::Overflow {
                offset: 0,
                len: 20,
                capacity: 10
            })
        ));
        assert_eq!(mbox.port().acks(), 1);
    }

    #[test]
    fn test_stale_segment_dropped() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(Segment::new(OPCODE, Context::DEFAULT, 56, &[1u8; 8], false));
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 128];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::OffsetMismatch {
                expected: 0,
                found: 56
            })
        ));
        assert_eq!(mbox.port().acks(), 1);
        assert!(!mbox.port().out_valid());
    }

    #[test]
    fn test_new_message_mid_stream_left_for_next_receive() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_segment(Segment::new(OPCODE, Context::DEFAULT, 0, &[1u8; 56], true));
        sim.push_message(OPCODE, Context::DEFAULT, b"fresh");
        let mut mbox = transport(sim, &clock);

        let mut buf = [0u8; 128];
        assert!(matches!(
            mbox.receive(OPCODE, None, &mut buf),
            Err(MailboxError::OffsetMismatch {
                expected: 56,
                found: 0
            })
        ));
        assert_eq!(mbox.port().acks(), 1);
        assert!(mbox.port().out_valid());

        let received = mbox.receive(OPCODE, None, &mut buf).unwrap();
        assert_eq!(&buf[..received.len], b"fresh");
    }

    #[test]
    fn test_loopback_round_trip_unaligned_tail() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::loopback(), &clock);
        let payload: Vec<u8> = (0..63u8).collect();

        mbox.send(OPCODE, ctx(5), &payload).unwrap();
        let mut buf = [0xFFu8; 128];
        let received = mbox.receive(OPCODE, None, &mut buf).unwrap();

        assert_eq!(received.context, ctx(5));
        assert_eq!(&buf[..received.len], &payload[..]);
        // Bytes past the message are untouched.
        assert_eq!(buf[63], 0xFF);
    }

    #[test]
    fn test_short_tail_ignores_stale_in_words() {
        let clock = ManualClock::new();
        let mut mbox = transport(SimPort::new(), &clock);
        mbox.send(OPCODE, Context::DEFAULT, &[0xAB; 57]).unwrap();

        let sim = mbox.into_port();
        let tail = &sim.submitted()[1];
        assert_eq!(tail.header.offset, 56);
        assert_eq!(tail.header.len, 1);
        assert_eq!(tail.wire_words(), &[OPCODE, word1(56, 1, false, 0), 0xAB]);
        assert_eq!(tail.payload(), vec![0xAB]);
        // Left over from the first segment.
        assert_eq!(tail.words[HEADER_WORDS + 1], 0xABAB_ABAB);
    }

    /// Keeps the device looking busy for `hold` polls after every handshake.
    struct SlowPort {
        inner: SimPort,
        hold: usize,
        in_busy: usize,
        out_busy: usize,
    }

    impl SlowPort {
        fn new(inner: SimPort, hold: usize) -> Self {
            SlowPort {
                inner,
                hold,
                in_busy: 0,
                out_busy: 0,
            }
        }
    }

    impl RegisterPort for SlowPort {
        fn read_word(&mut self, offset: usize) -> io::Result<u32> {
            let value = self.inner.read_word(offset)?;
            if offset == EXT_CTRL && self.in_busy > 0 {
                self.in_busy -= 1;
                return Ok(value | EXT_CTRL_IN_VALID);
            }
            if offset == PSC_CTRL && self.out_busy > 0 {
                self.out_busy -= 1;
                return Ok(value & !PSC_CTRL_OUT_VALID);
            }
            Ok(value)
        }

        fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()> {
            if offset == EXT_CTRL {
                if value & EXT_CTRL_IN_VALID != 0 {
                    self.in_busy = self.hold;
                }
                if value & EXT_CTRL_OUT_DONE != 0 {
                    self.out_busy = self.hold;
                }
            }
            self.inner.write_word(offset, value)
        }
    }

    #[test]
    fn test_send_deadline_covers_whole_message() {
        let clock = ManualClock::new();
        // 400 ms per segment fits the 1 s budget, four of them do not.
        let mut mbox = MailboxTransport::with_clock(SlowPort::new(SimPort::new(), 400), &clock);

        match mbox.send(OPCODE, Context::DEFAULT, &[3u8; 200]) {
            Err(MailboxError::Timeout {
                elapsed,
                transferred,
            }) => {
                assert!(elapsed > DEFAULT_TIMEOUT);
                assert!(elapsed <= DEFAULT_TIMEOUT + 2 * DEFAULT_POLL_INTERVAL);
                assert_eq!(transferred, 3 * SEGMENT_PAYLOAD_MAX);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mbox.port().inner.submitted().len(), 3);
    }

    #[test]
    fn test_slow_send_within_deadline() {
        let clock = ManualClock::new();
        let mut mbox = MailboxTransport::with_clock(SlowPort::new(SimPort::new(), 400), &clock);

        mbox.send(OPCODE, Context::DEFAULT, &[3u8; 100]).unwrap();
        assert_eq!(mbox.port().inner.submitted().len(), 2);
        assert!(clock.elapsed() < DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_receive_deadline_covers_whole_message() {
        let clock = ManualClock::new();
        let mut sim = SimPort::new();
        sim.push_message(OPCODE, Context::DEFAULT, &[9u8; 200]);
        let mut mbox = MailboxTransport::with_clock(SlowPort::new(sim, 400), &clock);

        let mut buf = [0u8; 256];
        match mbox.receive(OPCODE, None, &mut buf) {
            Err(MailboxError::Timeout {
                elapsed,
                transferred,
            }) => {
                assert!(elapsed > DEFAULT_TIMEOUT);
                assert!(elapsed <= DEFAULT_TIMEOUT + 2 * DEFAULT_POLL_INTERVAL);
                assert_eq!(transferred, 3 * SEGMENT_PAYLOAD_MAX);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mbox.port().inner.acks(), 3);
    }

    proptest! {
        #[test]
        fn prop_send_segments_cover_payload(len in 1usize..=600, id in 0u8..=7) {
            let clock = ManualClock::new();
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut mbox = transport(SimPort::new(), &clock);
            mbox.send(OPCODE, ctx(id), &payload).unwrap();

            let sim = mbox.into_port();
            let submitted = sim.submitted();
            prop_assert_eq!(submitted.len(), (len + SEGMENT_PAYLOAD_MAX - 1) / SEGMENT_PAYLOAD_MAX);

            let mut next = 0usize;
            for (i, seg) in submitted.iter().enumerate() {
                prop_assert_eq!(usize::from(seg.header.offset), next);
                prop_assert_eq!(seg.header.more, i + 1 < submitted.len());
                prop_assert_eq!(seg.header.context, ctx(id));
                next += usize::from(seg.header.len);
            }
            prop_assert_eq!(next, len);

            // The IN buffer keeps stale words past a short segment, so only
            // the words actually written are compared.
            for (seg, expected) in submitted.iter().zip(segments(OPCODE, ctx(id), &payload)) {
                prop_assert_eq!(seg.wire_words(), expected.wire_words());
            }
        }

        #[test]
        fn prop_loopback_round_trip(len in 1usize..=(0x1200 + 64)) {
            let clock = ManualClock::new();
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let mut mbox = transport(SimPort::loopback(), &clock);

            mbox.send(OPCODE, Context::DEFAULT, &payload).unwrap();
            let mut buf = vec![0u8; 0x1200 + 64];
            let received = mbox.receive(OPCODE, None, &mut buf).unwrap();
            prop_assert_eq!(&buf[..received.len], &payload[..]);
        }
    }
}
