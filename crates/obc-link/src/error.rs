//! Link and client error types.

use obc_packet::{PacketError, ResultCode};
use obc_spec::{CommandError, LoadError, SpecError, TraceError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the routing fabric.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricError {
    /// The destination was closed.
    #[error("destination closed")]
    Closed,

    /// The other end of the channel is gone.
    #[error("destination disconnected")]
    Disconnected,
}

/// Errors raised while opening, running or configuring a link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Workers were started on a device that is already open.
    #[error("device {device} is already connected")]
    AlreadyConnected {
        /// Device description.
        device: String,
    },

    /// The device could not be opened.
    #[error("failed to connect to {device}: {message}")]
    Connect {
        /// Device description.
        device: String,
        /// I/O error text.
        message: String,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn thread {thread}: {message}")]
    Spawn {
        /// Thread name.
        thread: &'static str,
        /// I/O error text.
        message: String,
    },

    /// The link has been closed.
    #[error("link closed")]
    Closed,

    /// An outbound frame could not be queued.
    #[error("outbound queue: {0}")]
    Fabric(#[from] FabricError),

    /// An outbound frame could not be built.
    #[error("framing: {0}")]
    Packet(#[from] PacketError),

    /// A configuration file could not be used.
    #[error("config {path}: {message}")]
    Config {
        /// File path or "<inline>".
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Spec files referenced by the configuration failed to load.
    #[error(transparent)]
    Spec(#[from] LoadError),
}

/// Errors returned for one command.
///
/// Cloneable so a scheduled outcome can be handed out more than once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// The command is not in the registry.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Arguments could not be encoded or the response could not be decoded.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The command could not be sent.
    #[error("command '{command}': {source}")]
    Link {
        /// Command name.
        command: String,
        /// Underlying link error.
        #[source]
        source: LinkError,
    },

    /// The response body had no result byte.
    #[error("command '{command}': empty response body")]
    Short {
        /// Command name.
        command: String,
    },

    /// The result byte is not a known result code.
    #[error("command '{command}': unknown result code 0x{code:02X}")]
    UnknownResult {
        /// Command name.
        command: String,
        /// The result byte.
        code: u8,
    },

    /// The OBC answered with a non-success result.
    #[error("command '{command}' rejected: {result}")]
    Rejected {
        /// Command name.
        command: String,
        /// Result reported by the OBC.
        result: ResultCode,
    },

    /// A scheduled command was acknowledged without a schedule uuid.
    #[error("command '{command}': expected a scheduled acknowledgement, got {result}")]
    NotScheduled {
        /// Command name.
        command: String,
        /// Result reported by the OBC.
        result: ResultCode,
    },

    /// No response arrived in time.
    #[error("command '{command}': no response within {timeout:?}")]
    Timeout {
        /// Command name.
        command: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// A pending response with this uuid is already registered.
    #[error("scheduled uuid {uuid} is already pending")]
    DuplicateUuid {
        /// The schedule uuid.
        uuid: u32,
    },

    /// The scheduled execution reported failure.
    #[error("command '{command}' (uuid {uuid}) failed on board{}", format_code(.code))]
    ExecutionFailed {
        /// Command name.
        command: String,
        /// The schedule uuid.
        uuid: u32,
        /// First payload byte, when present.
        code: Option<u8>,
    },

    /// A scheduled response names a different command than the one registered.
    #[error("uuid {uuid}: response is for command id 0x{actual:04X}, expected 0x{expected:04X}")]
    CommandMismatch {
        /// The schedule uuid.
        uuid: u32,
        /// Registered command id.
        expected: u16,
        /// Command id in the response header.
        actual: u16,
    },

    /// A response decoded but did not have the expected shape.
    #[error("command '{command}': unexpected response: {reason}")]
    UnexpectedResponse {
        /// Command name.
        command: String,
        /// What was wrong.
        reason: String,
    },

    /// A captured trace could not be reconstructed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The client closed before the response arrived.
    #[error("client closed before the response arrived")]
    Cancelled,
}

fn format_code(code: &Option<u8>) -> String {
    match code {
        Some(code) => format!(" with code 0x{:02X}", code),
        None => String::new(),
    }
}

impl ResponseError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseError::Spec(_) => "spec",
            ResponseError::Command(_) => "codec",
            ResponseError::Link { .. } => "link",
            ResponseError::Short { .. } => "short",
            ResponseError::UnknownResult { .. } => "unknown_result",
            ResponseError::Rejected { .. } => "rejected",
            ResponseError::NotScheduled { .. } => "not_scheduled",
            ResponseError::Timeout { .. } => "timeout",
            ResponseError::DuplicateUuid { .. } => "duplicate_uuid",
            ResponseError::ExecutionFailed { .. } => "execution_failed",
            ResponseError::CommandMismatch { .. } => "command_mismatch",
            ResponseError::UnexpectedResponse { .. } => "unexpected_response",
            ResponseError::Trace(_) => "trace",
            ResponseError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ResponseError::ExecutionFailed {
            command: "deploy".into(),
            uuid: 7,
            code: Some(3),
        };
        assert_eq!(err.to_string(), "command 'deploy' (uuid 7) failed on board with code 0x03");

        let err = ResponseError::ExecutionFailed {
            command: "deploy".into(),
            uuid: 7,
            code: None,
        };
        assert_eq!(err.to_string(), "command 'deploy' (uuid 7) failed on board");

        let err = ResponseError::Rejected {
            command: "ping".into(),
            result: ResultCode::Busy,
        };
        assert_eq!(err.to_string(), "command 'ping' rejected: busy");
        assert_eq!(err.kind(), "rejected");
    }
}
