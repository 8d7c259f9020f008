use obc_link::{LinkError, ResponseError};
use obc_spec::{CommandError, SpecError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Arguments(#[from] CommandError),

    #[error("invalid time '{text}': {message}")]
    Time { text: String, message: String },

    #[error("no response from '{command}' (uuid {uuid}) within {timeout:?}")]
    WaitTimeout {
        command: String,
        uuid: u32,
        timeout: Duration,
    },

    #[error("no spec files configured; pass --config with a 'specs' section")]
    NoSpecs,

    #[error("failed to install log subscriber: {0}")]
    Logging(String),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}
