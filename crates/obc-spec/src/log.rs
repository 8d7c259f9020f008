//! Log group and signal specifications.

use crate::error::SpecError;
use crate::key::{Key, NameIdIndex};
use obc_fields::{FieldList, Record};
use serde::{Deserialize, Serialize};

/// Severity attached to a log signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signal within a log group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSignalSpec {
    name: String,
    id: u8,
    level: LogLevel,
    data: FieldList,
}

impl LogSignalSpec {
    pub fn new(name: impl Into<String>, id: u8, level: LogLevel, data: FieldList) -> Self {
        LogSignalSpec {
            name: name.into(),
            id,
            level,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn data(&self) -> &FieldList {
        &self.data
    }

    /// Decode a signal payload.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, SpecError> {
        self.data.decode(bytes).map_err(|source| SpecError::Decode {
            spec: self.name.clone(),
            source,
        })
    }
}

/// A group of related log signals.
#[derive(Debug, Clone)]
pub struct LogGroupSpec {
    name: String,
    id: u8,
    description: String,
    signals: Vec<LogSignalSpec>,
    index: NameIdIndex,
}

impl LogGroupSpec {
    /// Build a group, rejecting duplicate signal ids and names.
    pub fn new(
        name: impl Into<String>,
        id: u8,
        description: impl Into<String>,
        signals: Vec<LogSignalSpec>,
    ) -> Result<Self, SpecError> {
        let name = name.into();
        let index = NameIdIndex::build(
            "log signal",
            signals.iter().map(|s| (s.name(), u32::from(s.id()))),
        )
        .map_err(|e| SpecError::invalid(&name, e.to_string()))?;
        Ok(LogGroupSpec {
            name,
            id,
            description: description.into(),
            signals,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Signals in definition order.
    pub fn signals(&self) -> &[LogSignalSpec] {
        &self.signals
    }

    /// Look up a signal by name or id.
    pub fn signal<'a>(&self, key: impl Into<Key<'a>>) -> Result<&LogSignalSpec, SpecError> {
        let key = key.into();
        self.index
            .find(key)
            .map(|i| &self.signals[i])
            .ok_or_else(|| SpecError::not_found("log signal", format!("{} in group '{}'", key, self.name)))
    }
}

impl PartialEq for LogGroupSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.id == other.id
            && self.description == other.description
            && self.signals == other.signals
    }
}

/// All log groups for one OBC build.
#[derive(Debug, Clone, Default)]
pub struct LogRegistry {
    groups: Vec<LogGroupSpec>,
    index: NameIdIndex,
}

impl LogRegistry {
    /// Build a registry, rejecting duplicate group ids and names.
    pub fn new(groups: Vec<LogGroupSpec>) -> Result<Self, SpecError> {
        let index = NameIdIndex::build(
            "log group",
            groups.iter().map(|g| (g.name(), u32::from(g.id()))),
        )?;
        Ok(LogRegistry { groups, index })
    }

    /// Look up a group by name or id.
    pub fn group<'a>(&self, key: impl Into<Key<'a>>) -> Result<&LogGroupSpec, SpecError> {
        let key = key.into();
        self.index
            .find(key)
            .map(|i| &self.groups[i])
            .ok_or_else(|| SpecError::not_found("log group", key))
    }

    /// Two-level lookup: group, then signal within it.
    pub fn signal<'a, 'b>(
        &self,
        group: impl Into<Key<'a>>,
        signal: impl Into<Key<'b>>,
    ) -> Result<(&LogGroupSpec, &LogSignalSpec), SpecError> {
        let group = self.group(group)?;
        Ok((group, group.signal(signal)?))
    }

    /// Decode a log payload identified by group and signal id.
    pub fn decode(&self, group_id: u8, signal_id: u8, data: &[u8]) -> Result<Record, SpecError> {
        let (_, signal) = self.signal(group_id, signal_id)?;
        signal.decode(data)
    }

    /// Groups in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &LogGroupSpec> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of signals across all groups.
    pub fn signal_count(&self) -> usize {
        self.groups.iter().map(|g| g.signals.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_fields::{ByteOrder, FieldValue};

    fn power_group() -> LogGroupSpec {
        let data = FieldList::from_type_strs([("volts", "u16"), ("amps", "i16")], ByteOrder::Big).unwrap();
        LogGroupSpec::new(
            "power",
            3,
            "EPS telemetry",
            vec![
                LogSignalSpec::new("bus", 1, LogLevel::Info, data),
                LogSignalSpec::new("brownout", 2, LogLevel::Critical, FieldList::empty()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_two_level_lookup_and_decode() {
        let reg = LogRegistry::new(vec![power_group()]).unwrap();
        let (group, signal) = reg.signal("POWER", "bus").unwrap();
        assert_eq!(group.id(), 3);
        assert_eq!(signal.level(), LogLevel::Info);

        let record = reg.decode(3, 1, &[0x13, 0x88, 0xFF, 0xFE]).unwrap();
        assert_eq!(record.get("volts"), Some(&FieldValue::Unsigned(5000)));
        assert_eq!(record.get("amps"), Some(&FieldValue::Signed(-2)));
    }

    #[test]
    fn test_decode_errors() {
        let reg = LogRegistry::new(vec![power_group()]).unwrap();
        assert!(matches!(reg.decode(3, 1, &[0x13]), Err(SpecError::Decode { .. })));
        assert!(matches!(reg.decode(3, 9, &[]), Err(SpecError::NotFound { .. })));
        assert!(matches!(reg.decode(4, 1, &[]), Err(SpecError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_signal_ids_rejected() {
        let err = LogGroupSpec::new(
            "adcs",
            1,
            "",
            vec![
                LogSignalSpec::new("a", 1, LogLevel::Debug, FieldList::empty()),
                LogSignalSpec::new("b", 1, LogLevel::Debug, FieldList::empty()),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'adcs': duplicate log signal id 1: 'a' and 'b'"
        );
    }

    #[test]
    fn test_duplicate_group_ids_rejected() {
        let err = LogRegistry::new(vec![power_group(), power_group()]).unwrap_err();
        assert!(matches!(err, SpecError::DuplicateId { kind: "log group", id: 3, .. }));
    }

    #[test]
    fn test_level_serde() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warning);
        assert_eq!(serde_json::to_string(&LogLevel::Critical).unwrap(), "\"critical\"");
    }
}
