//! OBC specification registries
//!
//! Registries of the commands, log signals and RTOS tasks an OBC build
//! exposes, loaded from declarative YAML or JSON documents. Construction is
//! the only validation point: a registry that exists is internally consistent.
//!
//! # Example
//!
//! ```rust
//! use obc_fields::{ByteOrder, FieldValue};
//! use obc_spec::CommandRegistry;
//!
//! let reg = CommandRegistry::from_yaml_str(
//!     "set_rate:\n  id: 0x10\n  args:\n    - hz: u16\n",
//!     ByteOrder::Big,
//! ).unwrap();
//! let cmd = reg.get("SET_RATE").unwrap();
//! assert_eq!(cmd.encode_args(&[FieldValue::Unsigned(42)]).unwrap(), vec![0x00, 0x2A]);
//! ```

mod command;
mod error;
mod key;
mod loader;
mod log;
mod task;
mod trace;

pub use command::*;
pub use error::*;
pub use key::Key;
pub use loader::SpecSet;
pub use log::*;
pub use task::*;
pub use trace::*;
