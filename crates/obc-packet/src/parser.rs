//! Incremental stream parsing.
//!
//! A [`FrameFormat`] describes one framing as a state machine whose states
//! each examine a bounded amount of input. [`StreamParser`] drives any format
//! over arbitrarily chunked input, so the packets it emits do not depend on
//! where the chunk boundaries fall.

use crate::constants::*;
use crate::crc::crc16;
use crate::error::PacketError;
use crate::frame::{Packet, RelayFrame, SerialFrame};
use bytes::{Buf, BytesMut};
use obc_metrics::metric_defs;

/// What a state handler concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Frame still in progress.
    Pending,
    /// `frame` now holds one complete frame.
    Complete,
    /// The frame in progress is invalid and is dropped.
    Rejected(PacketError),
}

/// Result of one state handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<S> {
    /// State to continue from.
    pub next: S,
    /// Input bytes consumed.
    pub consumed: usize,
    pub outcome: Outcome,
}

impl<S> Step<S> {
    fn pending(next: S, consumed: usize) -> Self {
        Step {
            next,
            consumed,
            outcome: Outcome::Pending,
        }
    }

    fn wait(state: S) -> Self {
        Self::pending(state, 0)
    }
}

/// A framing expressed as a state machine.
pub trait FrameFormat {
    /// Parser state. `Default` is the idle, hunting-for-sync state.
    type State: Copy + Eq + Default + std::fmt::Debug;

    /// The frame type produced.
    type Packet;

    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Run the handler for `state` against the buffered `input`.
    ///
    /// The handler appends the bytes that belong to the frame to `frame`. A
    /// handler without enough input consumes nothing and keeps its state.
    fn step(&self, state: Self::State, frame: &mut Vec<u8>, input: &[u8]) -> Step<Self::State>;

    /// Build a packet from a complete frame.
    fn build(&self, frame: &[u8]) -> Result<Self::Packet, PacketError>;

    /// Serialize a packet for transmission.
    fn encode(&self, packet: &Self::Packet) -> Vec<u8>;
}

// ============================================================================
// Serial format
// ============================================================================

/// States of the serial frame parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialState {
    #[default]
    Sync0,
    Sync1,
    Header,
    Data { len: u8 },
    Crc { len: u8 },
}

/// `AB CD len payload crc16` framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFormat {
    max_payload: usize,
}

impl SerialFormat {
    /// Framing for a direct serial link.
    pub const fn serial() -> Self {
        SerialFormat {
            max_payload: SERIAL_MAX_PAYLOAD,
        }
    }

    /// Framing for serial frames carried inside COMMS relay frames.
    pub const fn comms() -> Self {
        SerialFormat {
            max_payload: COMMS_MAX_PAYLOAD,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for SerialFormat {
    fn default() -> Self {
        Self::serial()
    }
}

impl FrameFormat for SerialFormat {
    type State = SerialState;
    type Packet = SerialFrame;

    fn name(&self) -> &'static str {
        "serial"
    }

    fn step(&self, state: SerialState, frame: &mut Vec<u8>, input: &[u8]) -> Step<SerialState> {
        let Some(&byte) = input.first() else {
            // Only an empty data section can progress without input.
            return match state {
                SerialState::Data { len: 0 } => Step::pending(SerialState::Crc { len: 0 }, 0),
                _ => Step::wait(state),
            };
        };

        match state {
            SerialState::Sync0 => {
                if byte == SERIAL_SYNC[0] {
                    frame.push(byte);
                    return Step::pending(SerialState::Sync1, 1);
                }
                Step::pending(SerialState::Sync0, 1)
            }
            SerialState::Sync1 => {
                if byte == SERIAL_SYNC[1] {
                    frame.push(byte);
                    Step::pending(SerialState::Header, 1)
                } else if byte == SERIAL_SYNC[0] {
                    frame.clear();
                    frame.push(byte);
                    Step::pending(SerialState::Sync1, 1)
                } else {
                    frame.clear();
                    Step::pending(SerialState::Sync0, 1)
                }
            }
            SerialState::Header => {
                if usize::from(byte) > self.max_payload {
                    return Step {
                        next: SerialState::Sync0,
                        consumed: 1,
                        outcome: Outcome::Rejected(PacketError::PayloadTooLong {
                            max: self.max_payload,
                            actual: usize::from(byte),
                        }),
                    };
                }
                frame.push(byte);
                Step::pending(SerialState::Data { len: byte }, 1)
            }
            SerialState::Data { len } => {
                let len_usize = usize::from(len);
                if input.len() < len_usize {
                    return Step::wait(state);
                }
                frame.extend_from_slice(&input[..len_usize]);
                Step::pending(SerialState::Crc { len }, len_usize)
            }
            SerialState::Crc { len } => {
                if input.len() < 2 {
                    return Step::wait(state);
                }
                let received = u16::from_be_bytes([input[0], input[1]]);
                let payload = &frame[3..3 + usize::from(len)];
                let computed = crc16(payload);
                if computed != received {
                    return Step {
                        next: SerialState::Sync0,
                        consumed: 2,
                        outcome: Outcome::Rejected(PacketError::CrcMismatch { computed, received }),
                    };
                }
                frame.extend_from_slice(&input[..2]);
                Step {
                    next: SerialState::Sync0,
                    consumed: 2,
                    outcome: Outcome::Complete,
                }
            }
        }
    }

    fn build(&self, frame: &[u8]) -> Result<SerialFrame, PacketError> {
        let parsed = SerialFrame::deserialize(frame)?;
        SerialFrame::with_limit(parsed.into_payload(), self.max_payload)
    }

    fn encode(&self, packet: &SerialFrame) -> Vec<u8> {
        packet.serialize()
    }
}

// ============================================================================
// Relay format
// ============================================================================

/// States of the relay frame parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    #[default]
    Sync0,
    Sync1,
    Header,
    Data { len: u8 },
}

/// `22 69 len payload` framing used by the COMMS relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayFormat;

impl FrameFormat for RelayFormat {
    type State = RelayState;
    type Packet = RelayFrame;

    fn name(&self) -> &'static str {
        "relay"
    }

    fn step(&self, state: RelayState, frame: &mut Vec<u8>, input: &[u8]) -> Step<RelayState> {
        if let RelayState::Data { len } = state {
            let len_usize = usize::from(len);
            if input.len() < len_usize {
                return Step::wait(state);
            }
            frame.extend_from_slice(&input[..len_usize]);
            return Step {
                next: RelayState::Sync0,
                consumed: len_usize,
                outcome: Outcome::Complete,
            };
        }

        let Some(&byte) = input.first() else {
            return Step::wait(state);
        };
        match state {
            RelayState::Sync0 => {
                if byte == RELAY_SYNC[0] {
                    frame.push(byte);
                    return Step::pending(RelayState::Sync1, 1);
                }
                Step::pending(RelayState::Sync0, 1)
            }
            RelayState::Sync1 => {
                if byte == RELAY_SYNC[1] {
                    frame.push(byte);
                    Step::pending(RelayState::Header, 1)
                } else if byte == RELAY_SYNC[0] {
                    frame.clear();
                    frame.push(byte);
                    Step::pending(RelayState::Sync1, 1)
                } else {
                    frame.clear();
                    Step::pending(RelayState::Sync0, 1)
                }
            }
            RelayState::Header => {
                frame.push(byte);
                Step::pending(RelayState::Data { len: byte }, 1)
            }
            RelayState::Data { .. } => Step::wait(state),
        }
    }

    fn build(&self, frame: &[u8]) -> Result<RelayFrame, PacketError> {
        RelayFrame::deserialize(frame)
    }

    fn encode(&self, packet: &RelayFrame) -> Vec<u8> {
        packet.serialize()
    }
}

// ============================================================================
// Stream parser
// ============================================================================

/// Counters kept by a [`StreamParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParserStats {
    /// Bytes fed in.
    pub bytes: u64,
    /// Frames emitted.
    pub frames: u64,
    /// Frames dropped for a CRC mismatch.
    pub crc_errors: u64,
    /// Frames dropped for any other reason.
    pub other_errors: u64,
}

impl ParserStats {
    pub fn errors(&self) -> u64 {
        self.crc_errors + self.other_errors
    }
}

/// Drives a [`FrameFormat`] over chunked input.
#[derive(Debug)]
pub struct StreamParser<F: FrameFormat> {
    format: F,
    state: F::State,
    pending: BytesMut,
    frame: Vec<u8>,
    stats: ParserStats,
}

impl<F: FrameFormat> StreamParser<F> {
    pub fn new(format: F) -> Self {
        StreamParser {
            format,
            state: F::State::default(),
            pending: BytesMut::with_capacity(512),
            frame: Vec::with_capacity(512),
            stats: ParserStats::default(),
        }
    }

    /// Feed bytes and collect every frame they complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<F::Packet> {
        self.stats.bytes += data.len() as u64;
        self.pending.extend_from_slice(data);

        let mut packets = Vec::new();
        loop {
            let step = self.format.step(self.state, &mut self.frame, &self.pending);
            self.pending.advance(step.consumed);
            let stalled = step.consumed == 0 && step.next == self.state;
            self.state = step.next;

            match step.outcome {
                Outcome::Pending if stalled => break,
                Outcome::Pending => {}
                Outcome::Complete => {
                    match self.format.build(&self.frame) {
                        Ok(packet) => {
                            self.stats.frames += 1;
                            metrics::counter!(metric_defs::FRAMES_RECEIVED.name, "format" => self.format.name())
                                .increment(1);
                            packets.push(packet);
                        }
                        Err(err) => self.reject(err),
                    }
                    self.frame.clear();
                }
                Outcome::Rejected(err) => {
                    self.reject(err);
                    self.frame.clear();
                }
            }
        }
        packets
    }

    fn reject(&mut self, err: PacketError) {
        match err {
            PacketError::CrcMismatch { .. } => self.stats.crc_errors += 1,
            _ => self.stats.other_errors += 1,
        }
        log::warn!(
            "{} frame dropped: {} (frame so far {})",
            self.format.name(),
            err,
            hex::encode(&self.frame)
        );
        metrics::counter!(
            metric_defs::FRAME_ERRORS.name,
            "format" => self.format.name(),
            "reason" => err.reason()
        )
        .increment(1);
    }

    /// Serialize a packet through this parser's format.
    pub fn encode(&self, packet: &F::Packet) -> Vec<u8> {
        self.format.encode(packet)
    }

    /// Drop any partial frame and return to hunting for sync.
    pub fn reset(&mut self) {
        self.state = F::State::default();
        self.pending.clear();
        self.frame.clear();
    }

    pub fn state(&self) -> F::State {
        self.state
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    /// Bytes received but not yet consumed by a handler.
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

impl<F: FrameFormat + Default> Default for StreamParser<F> {
    fn default() -> Self {
        Self::new(F::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(payload: &[u8]) -> Vec<u8> {
        SerialFrame::new(payload.to_vec()).unwrap().serialize()
    }

    #[test]
    fn test_single_frame() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let frames = parser.push(&serial(&[0x01, 0x02, 0x03]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x01, 0x02, 0x03]);
        assert_eq!(parser.state(), SerialState::Sync0);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_empty_payload() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let frames = parser.push(&serial(&[]));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
    }

    #[test]
    fn test_garbage_and_repeated_sync() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let mut bytes = vec![0x00, 0xFF, 0xAB, 0xAB, 0xAB];
        bytes.extend_from_slice(&serial(b"hi")[1..]);
        let frames = parser.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hi");
        assert_eq!(parser.stats().errors(), 0);
    }

    #[test]
    fn test_sync1_repeat_keeps_state() {
        let format = SerialFormat::serial();
        let mut frame = vec![0xAB];
        let step = format.step(SerialState::Sync1, &mut frame, &[0xAB]);
        assert_eq!(step.next, SerialState::Sync1);
        assert_eq!(step.consumed, 1);
        assert_eq!(frame, vec![0xAB]);
    }

    #[test]
    fn test_handlers_wait_for_data() {
        let format = SerialFormat::serial();
        let mut frame = vec![0xAB, 0xCD, 0x04];
        let step = format.step(SerialState::Data { len: 4 }, &mut frame, &[1, 2, 3]);
        assert_eq!(step, Step::wait(SerialState::Data { len: 4 }));

        let step = format.step(SerialState::Crc { len: 0 }, &mut frame, &[0xFF]);
        assert_eq!(step.consumed, 0);
    }

    #[test]
    fn test_length_over_limit() {
        let mut parser = StreamParser::new(SerialFormat::comms());
        let mut bytes = vec![0xAB, 0xCD, 234];
        bytes.extend_from_slice(&serial(b"ok"));
        let frames = parser.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(parser.stats().other_errors, 1);
    }

    #[test]
    fn test_crc_error_counted_and_next_frame_parses() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let mut bad = serial(b"abc");
        bad[3] ^= 0x40;
        let mut bytes = bad;
        bytes.extend_from_slice(&serial(b"def"));
        let frames = parser.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"def");
        assert_eq!(parser.stats().crc_errors, 1);
        assert_eq!(parser.stats().frames, 1);
    }

    #[test]
    fn test_relay_frames() {
        let mut parser = StreamParser::new(RelayFormat);
        let inner = SerialFrame::new(vec![0x03, 0x00]).unwrap();
        let relay = RelayFrame::wrap(&inner).unwrap().serialize();

        let mut out = Vec::new();
        for b in &relay {
            out.extend(parser.push(std::slice::from_ref(b)));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload(), &inner.serialize()[..]);

        let empty = RelayFrame::new(Vec::new()).unwrap().serialize();
        assert_eq!(parser.push(&empty).len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut parser = StreamParser::new(SerialFormat::serial());
        let bytes = serial(b"abc");
        assert!(parser.push(&bytes[..5]).is_empty());
        parser.reset();
        assert_eq!(parser.state(), SerialState::Sync0);
        assert!(parser.push(&bytes[5..]).is_empty());
        assert_eq!(parser.push(&bytes).len(), 1);
    }
}
