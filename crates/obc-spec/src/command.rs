//! Command specifications and the command registry.

use crate::error::{CommandError, SpecError};
use crate::key::{Key, NameIdIndex};
use obc_fields::{FieldList, FieldValue, Record};
use serde::Serialize;

// ============================================================================
// Response shape
// ============================================================================

/// What a command answers with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseSpec {
    /// The command produces no response body.
    #[default]
    None,
    /// The response body is passed through undecoded.
    Raw,
    /// The response body is decoded with a field list.
    Fields(FieldList),
}

impl ResponseSpec {
    /// Short name for summaries.
    pub fn describe(&self) -> String {
        match self {
            ResponseSpec::None => "none".to_string(),
            ResponseSpec::Raw => "raw".to_string(),
            ResponseSpec::Fields(list) => list.to_string(),
        }
    }
}

/// A decoded command response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Fields decoded per the command's response list.
    Fields(Record),
    /// Undecoded response bytes.
    Raw(Vec<u8>),
    /// The command declares no response and the OBC sent no body.
    None,
}

impl Response {
    /// The decoded record, if this is a field response.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Response::Fields(record) => Some(record),
            _ => None,
        }
    }

    /// The raw bytes, if this is a raw response.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Response::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Fields(record) => write!(f, "{}", record),
            Response::Raw(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Response::None => f.write_str("(no response)"),
        }
    }
}

// ============================================================================
// Command spec
// ============================================================================

/// One command the OBC understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    name: String,
    id: u16,
    description: String,
    args: FieldList,
    resp: ResponseSpec,
}

impl CommandSpec {
    /// Create a command spec.
    pub fn new(name: impl Into<String>, id: u16, args: FieldList, resp: ResponseSpec) -> Self {
        CommandSpec {
            name: name.into(),
            id,
            description: String::new(),
            args,
            resp,
        }
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn args(&self) -> &FieldList {
        &self.args
    }

    pub fn resp(&self) -> &ResponseSpec {
        &self.resp
    }

    /// Encode the argument values into a command body.
    pub fn encode_args(&self, values: &[FieldValue]) -> Result<Vec<u8>, CommandError> {
        self.args.encode(values).map_err(|source| CommandError::Encode {
            command: self.name.clone(),
            id: self.id,
            source,
        })
    }

    /// Parse textual arguments, one string per field, then encode them.
    pub fn encode_text_args(&self, texts: &[&str]) -> Result<Vec<u8>, CommandError> {
        let values = self.parse_args(texts)?;
        self.encode_args(&values)
    }

    /// Parse textual arguments into values, one string per field.
    pub fn parse_args(&self, texts: &[&str]) -> Result<Vec<FieldValue>, CommandError> {
        let wrap = |source| CommandError::Encode {
            command: self.name.clone(),
            id: self.id,
            source,
        };
        if texts.len() != self.args.len() {
            return Err(wrap(obc_fields::EncodeError::ValueCount {
                expected: self.args.len(),
                actual: texts.len(),
            }));
        }
        self.args
            .fields()
            .iter()
            .zip(texts)
            .map(|(field, text)| field.parse_value(text).map_err(wrap))
            .collect()
    }

    /// Decode the body of a successful execution.
    ///
    /// Unlike [`decode_resp`](Self::decode_resp), an empty body for a command
    /// without a declared response is accepted as [`Response::None`].
    pub fn decode_success(&self, body: &[u8]) -> Result<Response, CommandError> {
        match self.resp {
            ResponseSpec::None if body.is_empty() => Ok(Response::None),
            _ => self.decode_resp(body),
        }
    }

    /// Decode a response body according to the declared response.
    pub fn decode_resp(&self, body: &[u8]) -> Result<Response, CommandError> {
        match &self.resp {
            ResponseSpec::None => Err(CommandError::NoResponse {
                command: self.name.clone(),
            }),
            ResponseSpec::Raw => Ok(Response::Raw(body.to_vec())),
            ResponseSpec::Fields(list) => list
                .decode(body)
                .map(Response::Fields)
                .map_err(|source| CommandError::Decode {
                    command: self.name.clone(),
                    id: self.id,
                    source,
                }),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (0x{:04X}) args {} -> {}",
            self.name,
            self.id,
            self.args,
            self.resp.describe()
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All commands known for one OBC build, indexed by name and id.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
    index: NameIdIndex,
}

impl CommandRegistry {
    /// Build a registry, rejecting duplicate ids and names.
    pub fn new(commands: Vec<CommandSpec>) -> Result<Self, SpecError> {
        let index = NameIdIndex::build(
            "command",
            commands.iter().map(|c| (c.name(), u32::from(c.id()))),
        )?;
        Ok(CommandRegistry { commands, index })
    }

    /// Look up a command by name or id.
    pub fn get<'a>(&self, key: impl Into<Key<'a>>) -> Result<&CommandSpec, SpecError> {
        let key = key.into();
        self.index
            .find(key)
            .map(|i| &self.commands[i])
            .ok_or_else(|| SpecError::not_found("command", key))
    }

    pub fn by_name(&self, name: &str) -> Option<&CommandSpec> {
        self.get(Key::Name(name)).ok()
    }

    pub fn by_id(&self, id: u16) -> Option<&CommandSpec> {
        self.get(id).ok()
    }

    /// Commands in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
