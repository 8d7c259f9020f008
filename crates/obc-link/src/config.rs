//! Link and client configuration.
//!
//! Loaded from YAML; every field has a default so a config file only needs
//! the settings it changes:
//!
//! ```yaml
//! link:
//!   kind: comms
//!   address: 10.0.0.2:4000
//! command_timeout_ms: 5000
//! specs:
//!   commands: [specs/commands.yaml]
//!   logs: [specs/logs.yaml]
//!   tasks: [specs/tasks.yaml]
//! ```

use crate::error::LinkError;
use crate::worker::WorkerConfig;
use obc_fields::ByteOrder;
use obc_metrics::LinkLabels;
use obc_packet::{COMMS_MAX_PAYLOAD, SERIAL_MAX_PAYLOAD};
use obc_spec::SpecSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How frames are carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Serial frames directly on a UART.
    #[default]
    Serial,
    /// Serial frames wrapped in relay frames by the COMMS radio.
    Comms,
}

impl LinkKind {
    /// Largest serial-frame payload this link carries.
    pub fn max_payload(self) -> usize {
        match self {
            LinkKind::Serial => SERIAL_MAX_PAYLOAD,
            LinkKind::Comms => COMMS_MAX_PAYLOAD,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Serial => "serial",
            LinkKind::Comms => "comms",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(LinkKind::Serial),
            "comms" => Ok(LinkKind::Comms),
            other => Err(format!("unknown link kind '{}'", other)),
        }
    }
}

/// Device and worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub kind: LinkKind,
    /// `host:port` of the TCP-exposed UART.
    pub address: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on worker blocking reads.
    pub poll_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub read_buffer: usize,
    /// Outbound queue capacity; 0 is unbounded.
    pub tx_queue_size: usize,
    /// Raw inbound queue capacity; 0 is unbounded.
    pub rx_queue_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            kind: LinkKind::Serial,
            address: "127.0.0.1:5000".to_string(),
            connect_timeout_ms: 5000,
            poll_interval_ms: 50,
            join_timeout_ms: 2000,
            read_buffer: 512,
            tx_queue_size: 64,
            rx_queue_size: 0,
        }
    }
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn labels(&self) -> LinkLabels {
        LinkLabels::new(self.kind.as_str(), self.address.as_str())
    }

    /// Settings for [`DeviceWorkers`](crate::DeviceWorkers).
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval(),
            join_timeout: self.join_timeout(),
            read_buffer: self.read_buffer,
            labels: self.labels(),
        }
    }
}

/// The log signal carrying scheduled-command responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalRef {
    pub group: u8,
    pub signal: u8,
}

/// Spec files to load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecFiles {
    pub commands: Vec<PathBuf>,
    pub logs: Vec<PathBuf>,
    pub tasks: Vec<PathBuf>,
    /// Byte order of numeric fields in command and log specs.
    pub byte_order: ByteOrder,
}

impl SpecFiles {
    pub fn load(&self) -> Result<SpecSet, LinkError> {
        Ok(SpecSet::from_files(
            self.commands.as_slice(),
            self.logs.as_slice(),
            self.tasks.as_slice(),
            self.byte_order,
        )?)
    }
}

/// Everything an [`ObcClient`](crate::ObcClient) needs besides the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub link: LinkConfig,
    /// Default wait for immediate responses.
    pub command_timeout_ms: u64,
    /// Queue capacity for immediate responses; extra responses are dropped.
    pub response_queue_size: usize,
    /// Default queue capacity for log listeners.
    pub log_queue_size: usize,
    pub scheduled_response: SignalRef,
    pub specs: SpecFiles,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            link: LinkConfig::default(),
            command_timeout_ms: 2000,
            response_queue_size: 16,
            log_queue_size: 256,
            scheduled_response: SignalRef::default(),
            specs: SpecFiles::default(),
        }
    }
}

impl ClientConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, LinkError> {
        Self::parse(text, "<inline>")
    }

    /// Load a YAML file. Relative spec paths are resolved against the
    /// file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LinkError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = Self::parse(&text, &path.display().to_string())?;
        if let Some(base) = path.parent() {
            config.specs.resolve_relative(base);
        }
        Ok(config)
    }

    fn parse(text: &str, name: &str) -> Result<Self, LinkError> {
        if text.trim().is_empty() {
            return Ok(ClientConfig::default());
        }
        serde_yaml::from_str(text).map_err(|e| LinkError::Config {
            path: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl SpecFiles {
    fn resolve_relative(&mut self, base: &Path) {
        for path in self
            .commands
            .iter_mut()
            .chain(self.logs.iter_mut())
            .chain(self.tasks.iter_mut())
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_spec::{LoadError, SpecError};

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_yaml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert_eq!(config.scheduled_response, SignalRef { group: 0, signal: 0 });
        assert_eq!(config.link.kind.max_payload(), 237);
    }

    #[test]
    fn test_partial_yaml() {
        let config = ClientConfig::from_yaml_str(
            "link:\n  kind: comms\n  address: 10.0.0.2:4000\nscheduled_response:\n  group: 7\n",
        )
        .unwrap();
        assert_eq!(config.link.kind, LinkKind::Comms);
        assert_eq!(config.link.address, "10.0.0.2:4000");
        assert_eq!(config.link.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.scheduled_response, SignalRef { group: 7, signal: 0 });
        assert_eq!(config.link.kind.max_payload(), 233);
        assert_eq!(config.link.labels().link, "comms");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ClientConfig::from_yaml_str("lnik: {}\n").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
    }

    #[test]
    fn test_relative_spec_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path();
        let file = dir.join("obc.yaml");
        std::fs::write(
            &file,
            "specs:\n  commands: [cmds.yaml, /abs/cmds.yaml]\n  byte_order: little\n",
        )
        .unwrap();

        let config = ClientConfig::from_file(&file).unwrap();
        assert_eq!(config.specs.commands[0], dir.join("cmds.yaml"));
        assert_eq!(config.specs.commands[1], PathBuf::from("/abs/cmds.yaml"));
        assert_eq!(config.specs.byte_order, ByteOrder::Little);
        assert!(matches!(
            config.specs.load(),
            Err(LinkError::Spec(LoadError::Spec(SpecError::Io { .. })))
        ));
    }

    #[test]
    fn test_link_kind_parse() {
        assert_eq!("COMMS".parse::<LinkKind>().unwrap(), LinkKind::Comms);
        assert!("radio".parse::<LinkKind>().is_err());
    }
}
