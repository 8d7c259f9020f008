//! OBC field type system
//!
//! Typed binary encoding for everything carried inside an OBC frame: command
//! arguments, command responses and log signal payloads.
//!
//! # Overview
//!
//! - [`Field`] - one named value: a scalar kind plus an optional array shape
//! - [`FieldList`] - the ordered fields of one message body
//! - [`FieldValue`] / [`Record`] - decoded values
//! - [`ObcDateTime`] - seconds since 2000-01-01, zero meaning "immediate"
//!
//! # Example
//!
//! ```rust
//! use obc_fields::{ByteOrder, FieldList, FieldValue};
//!
//! let args = FieldList::from_type_strs([("x", "u16")], ByteOrder::Big).unwrap();
//! assert_eq!(args.encode(&[FieldValue::Unsigned(42)]).unwrap(), vec![0x00, 0x2A]);
//! assert!(args.encode(&[FieldValue::Unsigned(70000)]).is_err());
//! ```

mod datetime;
mod error;
mod field;
mod kind;
mod list;
mod value;

pub use datetime::*;
pub use error::*;
pub use field::*;
pub use kind::*;
pub use list::*;
pub use value::*;
