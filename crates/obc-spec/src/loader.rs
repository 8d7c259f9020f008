//! Declarative spec sources.
//!
//! Commands, log groups and tasks are described in YAML or JSON documents
//! keyed by name:
//!
//! ```yaml
//! ping:
//!   id: 0x0001
//!   resp: []
//! set_mode:
//!   id: 16
//!   args:
//!     - mode: u8
//!     - gains: f32[3]
//!   resp: raw
//! ```
//!
//! Files ending in `.json` are read with `serde_json`; everything else,
//! including in-memory text, is read as YAML.

use crate::command::{CommandRegistry, CommandSpec, ResponseSpec};
use crate::error::{LoadError, SpecError};
use crate::log::{LogGroupSpec, LogLevel, LogRegistry, LogSignalSpec};
use crate::task::{TaskRegistry, TaskSpec};
use obc_fields::{ByteOrder, Field, FieldList};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// Document shapes
// ============================================================================

/// An id written as an integer or as a decimal / `0x` hex string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IdDef {
    Int(u64),
    Text(String),
}

impl IdDef {
    fn resolve(&self, spec: &str, max: u64) -> Result<u64, SpecError> {
        let invalid = || SpecError::InvalidId {
            spec: spec.to_string(),
            value: self.to_string(),
        };
        let value = match self {
            IdDef::Int(v) => *v,
            IdDef::Text(text) => {
                let text = text.trim();
                match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
                    None => text.parse().map_err(|_| invalid())?,
                }
            }
        };
        if value > max {
            return Err(invalid());
        }
        Ok(value)
    }
}

impl std::fmt::Display for IdDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdDef::Int(v) => write!(f, "{}", v),
            IdDef::Text(s) => f.write_str(s),
        }
    }
}

/// `[{name: type}, ...]`
type FieldsDef = Vec<BTreeMap<String, String>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RespDef {
    Fields(FieldsDef),
    Keyword(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandDef {
    id: IdDef,
    #[serde(default)]
    description: String,
    #[serde(default)]
    args: FieldsDef,
    #[serde(default)]
    resp: Option<RespDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSignalDef {
    id: IdDef,
    #[serde(default)]
    level: LogLevel,
    #[serde(default)]
    data: FieldsDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogGroupDef {
    id: IdDef,
    #[serde(default)]
    description: String,
    #[serde(default)]
    signals: BTreeMap<String, LogSignalDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskDef {
    id: IdDef,
    #[serde(default)]
    stack_size: u32,
    #[serde(default)]
    priority: u8,
}

// ============================================================================
// Parsing helpers
// ============================================================================

fn parse_yaml<T: DeserializeOwned>(text: &str, source_name: &str) -> Result<T, SpecError> {
    // An empty document is an empty map.
    if text.trim().is_empty() {
        return serde_yaml::from_str("{}").map_err(|e| parse_error(source_name, e));
    }
    serde_yaml::from_str(text).map_err(|e| parse_error(source_name, e))
}

fn parse_error(source_name: &str, err: impl std::fmt::Display) -> SpecError {
    SpecError::Parse {
        source_name: source_name.to_string(),
        message: err.to_string(),
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, SpecError> {
    let name = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| SpecError::Io {
        path: name.clone(),
        message: e.to_string(),
    })?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text).map_err(|e| parse_error(&name, e))
    } else {
        parse_yaml(&text, &name)
    }
}

fn read_all<T: DeserializeOwned, P: AsRef<Path>>(paths: &[P]) -> Result<Vec<(String, T)>, SpecError> {
    let mut merged = Vec::new();
    for path in paths {
        let doc: BTreeMap<String, T> = read_document(path.as_ref())?;
        merged.extend(doc);
    }
    Ok(merged)
}

fn build_fields(spec: &str, defs: &FieldsDef, byte_order: ByteOrder) -> Result<FieldList, SpecError> {
    let wrap = |source| SpecError::Field {
        spec: spec.to_string(),
        source,
    };
    let fields = defs
        .iter()
        .map(|entry| {
            let mut iter = entry.iter();
            match (iter.next(), iter.next()) {
                (Some((name, ty)), None) => Field::from_type_str(name.as_str(), ty, byte_order).map_err(wrap),
                _ => Err(SpecError::invalid(
                    spec,
                    "each field entry must be a single 'name: type' pair",
                )),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    FieldList::new(fields).map_err(wrap)
}

// ============================================================================
// Builders
// ============================================================================

fn build_command(name: String, def: &CommandDef, byte_order: ByteOrder) -> Result<CommandSpec, SpecError> {
    let id = def.id.resolve(&name, u64::from(u16::MAX))? as u16;
    let args = build_fields(&name, &def.args, byte_order)?;
    let resp = match &def.resp {
        None => ResponseSpec::None,
        Some(RespDef::Fields(defs)) => ResponseSpec::Fields(build_fields(&name, defs, byte_order)?),
        Some(RespDef::Keyword(word)) if word.eq_ignore_ascii_case("raw") => ResponseSpec::Raw,
        Some(RespDef::Keyword(word)) => {
            return Err(SpecError::invalid(
                &name,
                format!("unknown response keyword '{}'", word),
            ))
        }
    };
    Ok(CommandSpec::new(name, id, args, resp).with_description(def.description.trim()))
}

fn build_group(name: String, def: &LogGroupDef, byte_order: ByteOrder) -> Result<LogGroupSpec, SpecError> {
    let id = def.id.resolve(&name, u64::from(u8::MAX))? as u8;
    let signals = def
        .signals
        .iter()
        .map(|(sig_name, sig)| {
            let qualified = format!("{}.{}", name, sig_name);
            let sig_id = sig.id.resolve(&qualified, u64::from(u8::MAX))? as u8;
            let data = build_fields(&qualified, &sig.data, byte_order)?;
            Ok(LogSignalSpec::new(sig_name.clone(), sig_id, sig.level, data))
        })
        .collect::<Result<Vec<_>, SpecError>>()?;
    LogGroupSpec::new(name, id, def.description.trim(), signals)
}

fn build_task(name: String, def: &TaskDef) -> Result<TaskSpec, LoadError> {
    let id = def.id.resolve(&name, u64::MAX)?;
    Ok(TaskSpec::new(name, id, def.stack_size, def.priority)?)
}

fn commands_from_defs(defs: Vec<(String, CommandDef)>, byte_order: ByteOrder) -> Result<CommandRegistry, SpecError> {
    let specs = defs
        .into_iter()
        .map(|(name, def)| build_command(name, &def, byte_order))
        .collect::<Result<Vec<_>, _>>()?;
    CommandRegistry::new(specs)
}

fn logs_from_defs(defs: Vec<(String, LogGroupDef)>, byte_order: ByteOrder) -> Result<LogRegistry, SpecError> {
    let groups = defs
        .into_iter()
        .map(|(name, def)| build_group(name, &def, byte_order))
        .collect::<Result<Vec<_>, _>>()?;
    LogRegistry::new(groups)
}

fn tasks_from_defs(defs: Vec<(String, TaskDef)>) -> Result<TaskRegistry, LoadError> {
    let tasks = defs
        .into_iter()
        .map(|(name, def)| build_task(name, &def))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TaskRegistry::new(tasks)?)
}

// ============================================================================
// Public entry points
// ============================================================================

impl CommandRegistry {
    /// Parse a command document held in memory.
    pub fn from_yaml_str(text: &str, byte_order: ByteOrder) -> Result<Self, SpecError> {
        let doc: BTreeMap<String, CommandDef> = parse_yaml(text, "<inline>")?;
        commands_from_defs(doc.into_iter().collect(), byte_order)
    }

    /// Load and merge several command documents, then validate the union.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], byte_order: ByteOrder) -> Result<Self, SpecError> {
        commands_from_defs(read_all(paths)?, byte_order)
    }
}

impl LogRegistry {
    /// Parse a log group document held in memory.
    pub fn from_yaml_str(text: &str, byte_order: ByteOrder) -> Result<Self, SpecError> {
        let doc: BTreeMap<String, LogGroupDef> = parse_yaml(text, "<inline>")?;
        logs_from_defs(doc.into_iter().collect(), byte_order)
    }

    /// Load and merge several log documents, then validate the union.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], byte_order: ByteOrder) -> Result<Self, SpecError> {
        logs_from_defs(read_all(paths)?, byte_order)
    }
}

impl TaskRegistry {
    /// Parse a task document held in memory.
    pub fn from_yaml_str(text: &str) -> Result<Self, LoadError> {
        let doc: BTreeMap<String, TaskDef> = parse_yaml(text, "<inline>")?;
        tasks_from_defs(doc.into_iter().collect())
    }

    /// Load and merge several task documents, then validate the union.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, LoadError> {
        tasks_from_defs(read_all(paths)?)
    }
}

/// The three registries describing one OBC build.
#[derive(Debug, Clone, Default)]
pub struct SpecSet {
    pub commands: CommandRegistry,
    pub logs: LogRegistry,
    pub tasks: TaskRegistry,
}

impl SpecSet {
    /// Load every registry from its own list of files.
    pub fn from_files<P: AsRef<Path>>(
        command_files: &[P],
        log_files: &[P],
        task_files: &[P],
        byte_order: ByteOrder,
    ) -> Result<Self, LoadError> {
        Ok(SpecSet {
            commands: CommandRegistry::from_files(command_files, byte_order)?,
            logs: LogRegistry::from_files(log_files, byte_order)?,
            tasks: TaskRegistry::from_files(task_files)?,
        })
    }
}
