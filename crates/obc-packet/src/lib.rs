//! OBC packet and framing layer
//!
//! Byte-level framing for the links between ground tooling and the onboard
//! computer, and the message layouts carried inside the frames.
//!
//! # Framing
//!
//! - Direct serial link: [`SerialFrame`], `AB CD len payload crc16`
//! - COMMS radio relay: [`RelayFrame`], `22 69 len payload`, whose payload is
//!   itself a serial frame
//!
//! [`StreamParser`] turns a byte stream into frames for either format,
//! independent of how the stream is chunked.
//!
//! # Example
//!
//! ```rust
//! use obc_packet::{Packet, SerialFormat, SerialFrame, StreamParser};
//!
//! let bytes = SerialFrame::new(vec![0x01, 0x02, 0x03]).unwrap().serialize();
//! let mut parser = StreamParser::new(SerialFormat::serial());
//! assert!(parser.push(&bytes[..4]).is_empty());
//! let frames = parser.push(&bytes[4..]);
//! assert_eq!(frames[0].payload(), &[0x01, 0x02, 0x03]);
//! ```

mod constants;
mod crc;
mod error;
mod frame;
mod message;
mod parser;

pub use constants::*;
pub use crc::*;
pub use error::*;
pub use frame::*;
pub use message::*;
pub use parser::*;
