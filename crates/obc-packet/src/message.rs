//! OBC messages carried in serial frame payloads.
//!
//! The first payload byte selects the message type:
//!
//! ```text
//! command   [01][seq][command_id:u16][date_time:u32][args...]
//! response  [02][seq][result][body...]
//! log       [03][group][signal][timestamp:u32][data...]
//! ```
//!
//! All multi-byte integers are big-endian.

use crate::constants::*;
use crate::error::PacketError;
use bytes::{Buf, BufMut};
use obc_fields::ObcDateTime;

fn too_short(what: &'static str, expected: usize, actual: usize) -> PacketError {
    PacketError::TooShort {
        what,
        expected,
        actual,
    }
}

// ============================================================================
// Result codes
// ============================================================================

/// Result byte leading every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Executed; the rest of the body is the command's response.
    Success,
    /// Accepted for later execution; the body carries the schedule uuid.
    Scheduled,
    InvalidArgs,
    UnknownCommand,
    ScheduleFull,
    Failed,
    Busy,
}

impl ResultCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            RESULT_SUCCESS => ResultCode::Success,
            RESULT_SCHEDULED => ResultCode::Scheduled,
            RESULT_INVALID_ARGS => ResultCode::InvalidArgs,
            RESULT_UNKNOWN_COMMAND => ResultCode::UnknownCommand,
            RESULT_SCHEDULE_FULL => ResultCode::ScheduleFull,
            RESULT_FAILED => ResultCode::Failed,
            RESULT_BUSY => ResultCode::Busy,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ResultCode::Success => RESULT_SUCCESS,
            ResultCode::Scheduled => RESULT_SCHEDULED,
            ResultCode::InvalidArgs => RESULT_INVALID_ARGS,
            ResultCode::UnknownCommand => RESULT_UNKNOWN_COMMAND,
            ResultCode::ScheduleFull => RESULT_SCHEDULE_FULL,
            ResultCode::Failed => RESULT_FAILED,
            ResultCode::Busy => RESULT_BUSY,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ResultCode::Success => "success",
            ResultCode::Scheduled => "scheduled",
            ResultCode::InvalidArgs => "invalid arguments",
            ResultCode::UnknownCommand => "unknown command",
            ResultCode::ScheduleFull => "schedule full",
            ResultCode::Failed => "execution failed",
            ResultCode::Busy => "busy",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Command
// ============================================================================

/// A command sent to the OBC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    /// Sequence number echoed by the immediate response.
    pub seq: u8,
    pub command_id: u16,
    /// When to execute; [`ObcDateTime::IMMEDIATE`] for now.
    pub date_time: ObcDateTime,
    /// Encoded arguments.
    pub args: Vec<u8>,
}

impl CommandPacket {
    /// Type, sequence, id and date/time.
    pub const HEADER_SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.args.len());
        buf.put_u8(PACKET_TYPE_COMMAND);
        buf.put_u8(self.seq);
        buf.put_u16(self.command_id);
        buf.put_u32(self.date_time.seconds());
        buf.extend_from_slice(&self.args);
        buf
    }

    /// Parse a command payload, type byte included.
    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(too_short("command", Self::HEADER_SIZE, payload.len()));
        }
        let mut buf = &payload[1..];
        Ok(CommandPacket {
            seq: buf.get_u8(),
            command_id: buf.get_u16(),
            date_time: ObcDateTime::from_seconds(buf.get_u32()),
            args: buf.to_vec(),
        })
    }
}

// ============================================================================
// Response
// ============================================================================

/// An immediate response from the OBC.
///
/// The body is kept whole; its first byte is the result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub seq: u8,
    pub body: Vec<u8>,
}

impl ResponsePacket {
    /// Type and sequence.
    pub const HEADER_SIZE: usize = 2;

    /// Build a response with a result code and data.
    pub fn with_result(seq: u8, result: ResultCode, data: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + data.len());
        body.push(result.as_byte());
        body.extend_from_slice(data);
        ResponsePacket { seq, body }
    }

    /// Acknowledgement of a scheduled command.
    pub fn scheduled(seq: u8, uuid: u32) -> Self {
        Self::with_result(seq, ResultCode::Scheduled, &uuid.to_be_bytes())
    }

    /// The raw result byte, if the body has one.
    pub fn result_byte(&self) -> Option<u8> {
        self.body.first().copied()
    }

    /// The body after the result byte.
    pub fn data(&self) -> &[u8] {
        self.body.get(1..).unwrap_or(&[])
    }

    /// Schedule uuid carried by a `Scheduled` acknowledgement.
    pub fn scheduled_uuid(&self) -> Option<u32> {
        if self.result_byte() != Some(RESULT_SCHEDULED) {
            return None;
        }
        let data = self.data();
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.body.len());
        buf.put_u8(PACKET_TYPE_RESPONSE);
        buf.put_u8(self.seq);
        buf.extend_from_slice(&self.body);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(too_short("response", Self::HEADER_SIZE, payload.len()));
        }
        Ok(ResponsePacket {
            seq: payload[1],
            body: payload[2..].to_vec(),
        })
    }
}

// ============================================================================
// Log entry
// ============================================================================

/// A log entry emitted by the OBC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub group: u8,
    pub signal: u8,
    pub timestamp: ObcDateTime,
    /// Encoded signal data.
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Type, group, signal and timestamp.
    pub const HEADER_SIZE: usize = 7;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.data.len());
        buf.put_u8(PACKET_TYPE_LOG);
        buf.put_u8(self.group);
        buf.put_u8(self.signal);
        buf.put_u32(self.timestamp.seconds());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(too_short("log entry", Self::HEADER_SIZE, payload.len()));
        }
        let mut buf = &payload[1..];
        Ok(LogEntry {
            group: buf.get_u8(),
            signal: buf.get_u8(),
            timestamp: ObcDateTime::from_seconds(buf.get_u32()),
            data: buf.to_vec(),
        })
    }

    /// Whether this entry is the given `(group, signal)`.
    pub fn is_signal(&self, group: u8, signal: u8) -> bool {
        self.group == group && self.signal == signal
    }
}

// ============================================================================
// Any message
// ============================================================================

/// Any OBC message, classified by its type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObcPacket {
    Command(CommandPacket),
    Response(ResponsePacket),
    Log(LogEntry),
}

impl ObcPacket {
    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        match payload.first() {
            None => Err(PacketError::EmptyPayload),
            Some(&PACKET_TYPE_COMMAND) => CommandPacket::decode(payload).map(ObcPacket::Command),
            Some(&PACKET_TYPE_RESPONSE) => ResponsePacket::decode(payload).map(ObcPacket::Response),
            Some(&PACKET_TYPE_LOG) => LogEntry::decode(payload).map(ObcPacket::Log),
            Some(&other) => Err(PacketError::UnknownPacketType(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ObcPacket::Command(cmd) => cmd.encode(),
            ObcPacket::Response(resp) => resp.encode(),
            ObcPacket::Log(entry) => entry.encode(),
        }
    }
}

// ============================================================================
// Scheduled command responses
// ============================================================================

/// Header of a scheduled command's response, delivered as log data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMessageHeader {
    /// Uuid handed out in the `Scheduled` acknowledgement.
    pub uuid: u32,
    pub command_id: u16,
    /// Time the command was scheduled for.
    pub date_time: ObcDateTime,
    pub flags: u8,
}

impl CommandMessageHeader {
    pub const SIZE: usize = 11;

    /// Execution failed; the payload is a single result code.
    pub const FLAG_FAILED: u8 = 0x01;

    pub fn failed(&self) -> bool {
        self.flags & Self::FLAG_FAILED != 0
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.uuid);
        buf.put_u16(self.command_id);
        buf.put_u32(self.date_time.seconds());
        buf.put_u8(self.flags);
        out
    }

    /// Split log data into a header and the payload that follows it.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if data.len() < Self::SIZE {
            return Err(too_short("command message header", Self::SIZE, data.len()));
        }
        let mut buf = &data[..Self::SIZE];
        let header = CommandMessageHeader {
            uuid: buf.get_u32(),
            command_id: buf.get_u16(),
            date_time: ObcDateTime::from_seconds(buf.get_u32()),
            flags: buf.get_u8(),
        };
        Ok((header, &data[Self::SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let cmd = CommandPacket {
            seq: 7,
            command_id: 0x0010,
            date_time: ObcDateTime::IMMEDIATE,
            args: vec![0x00, 0x2A],
        };
        let bytes = cmd.encode();
        assert_eq!(bytes, vec![0x01, 0x07, 0x00, 0x10, 0, 0, 0, 0, 0x00, 0x2A]);
        assert_eq!(ObcPacket::decode(&bytes).unwrap(), ObcPacket::Command(cmd));
    }

    #[test]
    fn test_response_helpers() {
        let ack = ResponsePacket::scheduled(3, 0xDEADBEEF);
        assert_eq!(ack.encode(), vec![0x02, 0x03, 0x01, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(ack.scheduled_uuid(), Some(0xDEADBEEF));

        let ok = ResponsePacket::with_result(4, ResultCode::Success, &[9]);
        assert_eq!(ok.result_byte(), Some(0));
        assert_eq!(ok.data(), &[9]);
        assert_eq!(ok.scheduled_uuid(), None);

        let empty = ResponsePacket::decode(&[0x02, 0x05]).unwrap();
        assert_eq!(empty.result_byte(), None);
        assert!(empty.data().is_empty());
    }

    #[test]
    fn test_log_layout() {
        let entry = LogEntry {
            group: 2,
            signal: 9,
            timestamp: ObcDateTime::from_seconds(0x01020304),
            data: vec![0xAA],
        };
        let bytes = entry.encode();
        assert_eq!(bytes, vec![0x03, 2, 9, 1, 2, 3, 4, 0xAA]);
        assert_eq!(LogEntry::decode(&bytes).unwrap(), entry);
        assert!(entry.is_signal(2, 9));
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(ObcPacket::decode(&[]), Err(PacketError::EmptyPayload));
        assert_eq!(ObcPacket::decode(&[0x7F]), Err(PacketError::UnknownPacketType(0x7F)));
        assert!(matches!(
            ObcPacket::decode(&[0x03, 1, 2]),
            Err(PacketError::TooShort { what: "log entry", .. })
        ));
    }

    #[test]
    fn test_command_message_header() {
        let header = CommandMessageHeader {
            uuid: 42,
            command_id: 0x0102,
            date_time: ObcDateTime::from_seconds(1000),
            flags: CommandMessageHeader::FLAG_FAILED,
        };
        let mut data = header.encode().to_vec();
        data.push(ResultCode::Failed.as_byte());

        let (parsed, rest) = CommandMessageHeader::decode(&data).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.failed());
        assert_eq!(rest, &[RESULT_FAILED]);

        assert!(CommandMessageHeader::decode(&data[..10]).is_err());
    }

    #[test]
    fn test_result_codes() {
        for byte in 0..=6u8 {
            assert_eq!(ResultCode::from_byte(byte).map(ResultCode::as_byte), Some(byte));
        }
        assert_eq!(ResultCode::from_byte(7), None);
        assert_eq!(ResultCode::ScheduleFull.to_string(), "schedule full");
    }
}
