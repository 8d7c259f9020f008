//! Specification error types.

use obc_fields::{DecodeError, EncodeError, FieldError};
use thiserror::Error;

/// Errors raised while building or querying a registry.
///
/// Construction errors are fatal: a registry with a bad definition is never
/// built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// Two specs share an id.
    #[error("duplicate {kind} id {id}: '{first}' and '{second}'")]
    DuplicateId {
        /// Kind of spec ("command", "log group", ...).
        kind: &'static str,
        /// The shared id.
        id: u32,
        /// First spec with this id.
        first: String,
        /// Second spec with this id.
        second: String,
    },

    /// Two specs share a name (case-insensitively).
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Kind of spec.
        kind: &'static str,
        /// The shared name.
        name: String,
    },

    /// Lookup found nothing.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of spec.
        kind: &'static str,
        /// The key searched for, rendered.
        key: String,
    },

    /// An id could not be parsed or does not fit.
    #[error("'{spec}': invalid id '{value}'")]
    InvalidId {
        /// Spec name.
        spec: String,
        /// The id as written.
        value: String,
    },

    /// A field definition is invalid.
    #[error("'{spec}': {source}")]
    Field {
        /// Spec name.
        spec: String,
        /// Underlying field error.
        #[source]
        source: FieldError,
    },

    /// A definition is structurally wrong.
    #[error("'{spec}': {reason}")]
    InvalidDefinition {
        /// Spec name.
        spec: String,
        /// What was wrong.
        reason: String,
    },

    /// A log payload did not match its signal definition.
    #[error("'{spec}': {source}")]
    Decode {
        /// Signal name.
        spec: String,
        /// Underlying decode error.
        #[source]
        source: DecodeError,
    },

    /// A source file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// I/O error text.
        message: String,
    },

    /// A source document could not be parsed.
    #[error("failed to parse {source_name}: {message}")]
    Parse {
        /// File path or "<inline>".
        source_name: String,
        /// Parser error text.
        message: String,
    },
}

impl SpecError {
    pub(crate) fn not_found(kind: &'static str, key: impl std::fmt::Display) -> Self {
        SpecError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        SpecError::InvalidDefinition {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while encoding or decoding a specific command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Arguments did not fit the command's argument list.
    #[error("command '{command}' (id {id}): {source}")]
    Encode {
        /// Command name.
        command: String,
        /// Command id.
        id: u16,
        /// Underlying field error.
        #[source]
        source: EncodeError,
    },

    /// Response bytes did not fit the command's response list.
    #[error("command '{command}' (id {id}) response: {source}")]
    Decode {
        /// Command name.
        command: String,
        /// Command id.
        id: u16,
        /// Underlying field error.
        #[source]
        source: DecodeError,
    },

    /// The command declares no response.
    #[error("command '{command}' declares no response")]
    NoResponse {
        /// Command name.
        command: String,
    },
}

/// Errors raised while building task specs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskSpecError {
    /// Task id does not fit the 32-bit task mask.
    #[error("task '{name}': id {id} out of range 0..={max}")]
    IdOutOfRange {
        /// Task name.
        name: String,
        /// The offending id.
        id: u64,
        /// Largest legal id.
        max: u8,
    },

    /// Task name does not fit the on-board name buffer.
    #[error("task '{name}': name is {len} characters, limit is {max}")]
    NameTooLong {
        /// Task name.
        name: String,
        /// Name length.
        len: usize,
        /// Longest legal name.
        max: usize,
    },

    /// Two tasks share an id.
    #[error("duplicate task id {id}: '{first}' and '{second}'")]
    DuplicateId {
        /// The shared id.
        id: u8,
        /// First task.
        first: String,
        /// Second task.
        second: String,
    },

    /// Two tasks share a name (case-insensitively).
    #[error("duplicate task name '{name}'")]
    DuplicateName {
        /// The shared name.
        name: String,
    },
}

/// Errors raised while loading spec documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A command or log document was unreadable or invalid.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// A task document described an invalid task set.
    #[error(transparent)]
    Task(#[from] TaskSpecError),
}

/// Errors raised while reconstructing an RTOS trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// Trace length is not a whole number of records.
    #[error("trace truncated: {len} bytes is not a multiple of {record_size}")]
    Truncated {
        /// Trace length.
        len: usize,
        /// Record size.
        record_size: usize,
    },

    /// Record carries an unknown event kind.
    #[error("record {index}: unknown event kind {kind}")]
    UnknownKind {
        /// Record index.
        index: usize,
        /// Raw kind byte.
        kind: u8,
    },

    /// A task was switched in while another was still running.
    #[error("record {index}: task {task} switched in while task {running} is running")]
    ConsecutiveSwitchIn {
        /// Record index.
        index: usize,
        /// Task being switched in.
        task: String,
        /// Task already running.
        running: String,
    },

    /// A task was switched out while nothing was running.
    #[error("record {index}: task {task} switched out while no task is running")]
    ConsecutiveSwitchOut {
        /// Record index.
        index: usize,
        /// Task being switched out.
        task: String,
    },

    /// Switch-out names a different task from the one running.
    #[error("record {index}: task {task} switched out but task {running} is running")]
    TaskMismatch {
        /// Record index.
        index: usize,
        /// Task being switched out.
        task: String,
        /// Task actually running.
        running: String,
    },

    /// Record names a task id that is not registered.
    #[error("record {index}: unknown task id {task_id}")]
    UnknownTask {
        /// Record index.
        index: usize,
        /// Raw task id.
        task_id: u8,
    },
}
