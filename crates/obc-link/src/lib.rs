//! # obc-link
//!
//! Everything between a byte device and a decoded OBC response.
//!
//! ## Layers
//!
//! - **Fabric**: small source/destination traits ([`PacketSource`],
//!   [`PacketDest`]) and the queues, fan-out and framing adapters built on them
//! - **Devices**: [`Device`] implementations for a TCP-exposed UART and an
//!   in-memory pair, driven by [`DeviceWorkers`] on dedicated RX/TX threads
//! - **Correlation**: matching scheduled-command responses, which arrive as
//!   log entries, back to the command that scheduled them
//! - **Client**: [`ObcClient`], which sends commands and decodes responses
//!   and logs using a [`SpecSet`](obc_spec::SpecSet)
//!
//! ## Example
//!
//! ```no_run
//! use obc_link::{ClientConfig, ObcClient};
//!
//! let config = ClientConfig::from_file("obc.yaml").unwrap();
//! let client = ObcClient::from_config(config).unwrap();
//! println!("ping: {:?}", client.ping().unwrap());
//! ```

mod client;
mod config;
mod correlation;
mod device;
mod error;
mod fabric;
mod worker;

pub use client::{CommandOutcome, DecodedLog, LogListener, ObcClient, StackUsage};
pub use config::{ClientConfig, LinkConfig, LinkKind, SignalRef, SpecFiles};
pub use correlation::{Correlator, Handled, PendingResponse};
pub use device::{Device, MemoryDevice, TcpDevice};
pub use error::{FabricError, LinkError, ResponseError};
pub use fabric::{
    DestId, MapDest, MapSource, MultiDest, Overflow, PacketDest, PacketSource,
    ProtocolPacketDest, ProtocolPacketSource, QueueBridge, Subscription,
};
pub use worker::{DeviceWorkers, WorkerConfig};
