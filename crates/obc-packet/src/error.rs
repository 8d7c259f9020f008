//! Framing and message error types.

use thiserror::Error;

/// Errors raised while framing or parsing OBC packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Input is too short to hold the structure.
    #[error("{what} too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// What was being parsed.
        what: &'static str,
        /// Minimum length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Frame does not start with the expected sync bytes.
    #[error("bad sync: expected {expected:02X?}, got {actual:02X?}")]
    BadSync {
        /// Expected sync bytes.
        expected: [u8; 2],
        /// Bytes found.
        actual: [u8; 2],
    },

    /// Payload exceeds the link's limit.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Largest legal payload.
        max: usize,
        /// Actual or declared payload length.
        actual: usize,
    },

    /// Declared length disagrees with the bytes present.
    #[error("length mismatch: header declares {declared} bytes, frame carries {actual}")]
    LengthMismatch {
        /// Length byte value.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// CRC over the payload does not match the trailer.
    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch {
        /// CRC computed over the payload.
        computed: u16,
        /// CRC carried by the frame.
        received: u16,
    },

    /// Payload type byte is not a known OBC packet type.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// Payload is empty, so it has no type byte.
    #[error("empty payload")]
    EmptyPayload,
}

impl PacketError {
    /// Short reason tag used as a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            PacketError::CrcMismatch { .. } => "crc",
            PacketError::PayloadTooLong { .. } | PacketError::LengthMismatch { .. } | PacketError::TooShort { .. } => {
                "length"
            }
            PacketError::BadSync { .. } => "sync",
            PacketError::UnknownPacketType(_) | PacketError::EmptyPayload => "invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = PacketError::CrcMismatch {
            computed: 0x4B37,
            received: 0x0000,
        };
        assert_eq!(err.to_string(), "CRC mismatch: computed 0x4B37, received 0x0000");
        assert_eq!(err.reason(), "crc");

        let err = PacketError::BadSync {
            expected: [0xAB, 0xCD],
            actual: [0x00, 0x01],
        };
        assert_eq!(err.to_string(), "bad sync: expected [AB, CD], got [00, 01]");
    }
}
