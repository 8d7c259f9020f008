//! Concrete frame types.
//!
//! ```text
//! serial:  +----+----+-----+-------------+--------+--------+
//!          | AB | CD | len | payload     | crc_hi | crc_lo |
//!          +----+----+-----+-------------+--------+--------+
//!
//! relay:   +----+----+-----+-------------+
//!          | 22 | 69 | len | payload     |
//!          +----+----+-----+-------------+
//! ```
//!
//! The serial CRC covers the payload only.

use crate::constants::*;
use crate::crc::crc16;
use crate::error::PacketError;
use bytes::BufMut;

/// A framed unit that can be serialized to and parsed from bytes.
pub trait Packet: Sized {
    /// Full on-wire encoding.
    fn serialize(&self) -> Vec<u8>;

    /// Parse one complete frame.
    fn deserialize(bytes: &[u8]) -> Result<Self, PacketError>;

    /// Check the frame against its structural limits.
    fn validate(&self) -> Result<(), PacketError>;

    /// The carried payload.
    fn payload(&self) -> &[u8];
}

fn check_sync(bytes: &[u8], sync: [u8; 2]) -> Result<(), PacketError> {
    let actual = [bytes[0], bytes[1]];
    if actual != sync {
        return Err(PacketError::BadSync {
            expected: sync,
            actual,
        });
    }
    Ok(())
}

fn check_len(payload: &[u8], max: usize) -> Result<(), PacketError> {
    if payload.len() > max {
        return Err(PacketError::PayloadTooLong {
            max,
            actual: payload.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Serial frame
// ============================================================================

/// A CRC-protected serial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    payload: Vec<u8>,
}

impl SerialFrame {
    /// Wrap a payload, checking it against the direct serial limit.
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self, PacketError> {
        let frame = SerialFrame {
            payload: payload.into(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Wrap a payload, checking it against an explicit limit.
    pub fn with_limit(payload: impl Into<Vec<u8>>, max_payload: usize) -> Result<Self, PacketError> {
        let payload = payload.into();
        check_len(&payload, max_payload.min(SERIAL_MAX_PAYLOAD))?;
        Ok(SerialFrame { payload })
    }

    /// CRC of the payload.
    pub fn crc(&self) -> u16 {
        crc16(&self.payload)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl Packet for SerialFrame {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SERIAL_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&SERIAL_SYNC);
        buf.put_u8(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.put_u16(self.crc());
        buf
    }

    fn deserialize(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < SERIAL_OVERHEAD {
            return Err(PacketError::TooShort {
                what: "serial frame",
                expected: SERIAL_OVERHEAD,
                actual: bytes.len(),
            });
        }
        check_sync(bytes, SERIAL_SYNC)?;
        let declared = usize::from(bytes[2]);
        let actual = bytes.len() - SERIAL_OVERHEAD;
        if declared != actual {
            return Err(PacketError::LengthMismatch { declared, actual });
        }
        let payload = &bytes[3..3 + declared];
        let received = u16::from_be_bytes([bytes[3 + declared], bytes[4 + declared]]);
        let computed = crc16(payload);
        if computed != received {
            return Err(PacketError::CrcMismatch { computed, received });
        }
        SerialFrame::new(payload)
    }

    fn validate(&self) -> Result<(), PacketError> {
        check_len(&self.payload, SERIAL_MAX_PAYLOAD)
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

// ============================================================================
// Relay frame
// ============================================================================

/// A COMMS relay frame. Carries no CRC of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    payload: Vec<u8>,
}

impl RelayFrame {
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self, PacketError> {
        let frame = RelayFrame {
            payload: payload.into(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Wrap a serial frame for the relay.
    pub fn wrap(inner: &SerialFrame) -> Result<Self, PacketError> {
        check_len(inner.payload(), COMMS_MAX_PAYLOAD)?;
        RelayFrame::new(inner.serialize())
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl From<SerialFrame> for RelayFrame {
    /// Carry a serial frame without the COMMS payload check.
    ///
    /// A serial frame is at most 242 bytes, so it always fits; callers that
    /// build the frame with [`SerialFrame::with_limit`] and
    /// [`COMMS_MAX_PAYLOAD`] get the same result as [`RelayFrame::wrap`].
    fn from(inner: SerialFrame) -> Self {
        RelayFrame {
            payload: inner.serialize(),
        }
    }
}

impl Packet for RelayFrame {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RELAY_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&RELAY_SYNC);
        buf.put_u8(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn deserialize(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < RELAY_HEADER_SIZE {
            return Err(PacketError::TooShort {
                what: "relay frame",
                expected: RELAY_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        check_sync(bytes, RELAY_SYNC)?;
        let declared = usize::from(bytes[2]);
        let actual = bytes.len() - RELAY_HEADER_SIZE;
        if declared != actual {
            return Err(PacketError::LengthMismatch { declared, actual });
        }
        RelayFrame::new(&bytes[RELAY_HEADER_SIZE..])
    }

    fn validate(&self) -> Result<(), PacketError> {
        check_len(&self.payload, RELAY_MAX_PAYLOAD)
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_layout() {
        let frame = SerialFrame::new(vec![0x01, 0x02, 0x03]).unwrap();
        assert_eq!(frame.serialize(), vec![0xAB, 0xCD, 0x03, 0x01, 0x02, 0x03, 0x61, 0x61]);
        assert_eq!(SerialFrame::deserialize(&frame.serialize()).unwrap(), frame);
    }

    #[test]
    fn test_serial_limits() {
        assert!(SerialFrame::new(vec![0; SERIAL_MAX_PAYLOAD]).is_ok());
        assert!(matches!(
            SerialFrame::new(vec![0; SERIAL_MAX_PAYLOAD + 1]),
            Err(PacketError::PayloadTooLong { max: 237, actual: 238 })
        ));
        assert!(SerialFrame::with_limit(vec![0; 234], COMMS_MAX_PAYLOAD).is_err());
    }

    #[test]
    fn test_serial_rejects_damage() {
        let mut bytes = SerialFrame::new(b"abc".to_vec()).unwrap().serialize();
        bytes[4] ^= 0x01;
        assert!(matches!(
            SerialFrame::deserialize(&bytes),
            Err(PacketError::CrcMismatch { .. })
        ));

        let bytes = [0xAB, 0xCD, 0x05, 0x00, 0xFF, 0xFF];
        assert!(matches!(
            SerialFrame::deserialize(&bytes),
            Err(PacketError::LengthMismatch { declared: 5, actual: 1 })
        ));

        let bytes = [0xAB, 0xCE, 0x00, 0xFF, 0xFF];
        assert!(matches!(SerialFrame::deserialize(&bytes), Err(PacketError::BadSync { .. })));
    }

    #[test]
    fn test_relay_wraps_serial() {
        let inner = SerialFrame::new(vec![0x03, 0x01]).unwrap();
        let relay = RelayFrame::wrap(&inner).unwrap();
        let bytes = relay.serialize();
        assert_eq!(&bytes[..3], &[0x22, 0x69, 7]);
        assert_eq!(RelayFrame::deserialize(&bytes).unwrap().payload(), &inner.serialize()[..]);

        let too_big = SerialFrame::new(vec![0; COMMS_MAX_PAYLOAD + 1]).unwrap();
        assert!(RelayFrame::wrap(&too_big).is_err());

        assert_eq!(RelayFrame::from(inner), relay);
        let largest = SerialFrame::new(vec![0; SERIAL_MAX_PAYLOAD]).unwrap();
        assert!(RelayFrame::from(largest).validate().is_ok());
    }
}
