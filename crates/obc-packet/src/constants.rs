//! Wire constants.

// ============================================================================
// Serial frames
// ============================================================================

/// Serial frame sync bytes.
pub const SERIAL_SYNC: [u8; 2] = [0xAB, 0xCD];

/// Sync, length byte and CRC around a serial payload.
pub const SERIAL_OVERHEAD: usize = 5;

/// Largest payload on a direct serial link.
pub const SERIAL_MAX_PAYLOAD: usize = 237;

/// Largest payload of a serial frame nested inside a COMMS relay frame.
pub const COMMS_MAX_PAYLOAD: usize = 233;

// ============================================================================
// Relay frames
// ============================================================================

/// Relay frame sync bytes.
pub const RELAY_SYNC: [u8; 2] = [0x22, 0x69];

/// Sync and length byte before a relay payload.
pub const RELAY_HEADER_SIZE: usize = 3;

/// Largest relay payload.
pub const RELAY_MAX_PAYLOAD: usize = 255;

// ============================================================================
// OBC packet types (first payload byte)
// ============================================================================

/// Ground → OBC command.
pub const PACKET_TYPE_COMMAND: u8 = 0x01;
/// OBC → ground immediate response.
pub const PACKET_TYPE_RESPONSE: u8 = 0x02;
/// OBC → ground log entry.
pub const PACKET_TYPE_LOG: u8 = 0x03;

// ============================================================================
// Result codes (first response body byte)
// ============================================================================

pub const RESULT_SUCCESS: u8 = 0;
pub const RESULT_SCHEDULED: u8 = 1;
pub const RESULT_INVALID_ARGS: u8 = 2;
pub const RESULT_UNKNOWN_COMMAND: u8 = 3;
pub const RESULT_SCHEDULE_FULL: u8 = 4;
pub const RESULT_FAILED: u8 = 5;
pub const RESULT_BUSY: u8 = 6;
