//! Metrics for the OBC protocol stack.
//!
//! Every metric the stack emits is declared here as a [`Metric`] constant so
//! names, units and label keys live in one place. Emission goes through the
//! `metrics` facade; without an installed recorder it is a no-op.
//!
//! ```rust
//! use obc_metrics::{metric_defs, LinkLabels};
//!
//! let labels = LinkLabels::new("serial", "127.0.0.1:5000");
//! metrics::counter!(metric_defs::LINK_RX_BYTES.name, &labels.to_labels()).increment(42);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric declaration: name, kind, description, unit and label keys.
///
/// ```rust
/// use obc_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter("obc.example.retries")
///     .with_description("Retries")
///     .with_unit(Unit::Count)
///     .with_labels(&["command"]);
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys every emission of this metric carries.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn with_kind(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => describe_histogram!(self.name, unit, self.description),
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the stack.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Link
    // ========================================================================

    /// Bytes read from the device.
    pub const LINK_RX_BYTES: Metric = Metric::counter("obc.link.rx_bytes")
        .with_description("Bytes read from the device")
        .with_unit(Unit::Bytes)
        .with_labels(&["link", "address"]);

    /// Bytes written to the device.
    pub const LINK_TX_BYTES: Metric = Metric::counter("obc.link.tx_bytes")
        .with_description("Bytes written to the device")
        .with_unit(Unit::Bytes)
        .with_labels(&["link", "address"]);

    /// Device read or write failures other than timeouts.
    ///
    /// Labels: link, address, direction (`rx` or `tx`)
    pub const LINK_IO_ERRORS: Metric = Metric::counter("obc.link.io_errors")
        .with_description("Device I/O errors")
        .with_unit(Unit::Count)
        .with_labels(&["link", "address", "direction"]);

    // ========================================================================
    // Framing
    // ========================================================================

    /// Frames that passed validation.
    pub const FRAMES_RECEIVED: Metric = Metric::counter("obc.frame.received")
        .with_description("Frames received and validated")
        .with_unit(Unit::Count)
        .with_labels(&["format"]);

    /// Frames dropped by the stream parser.
    ///
    /// Labels: format, reason (`crc`, `length`, `invalid`)
    pub const FRAME_ERRORS: Metric = Metric::counter("obc.frame.errors")
        .with_description("Frames dropped by the stream parser")
        .with_unit(Unit::Count)
        .with_labels(&["format", "reason"]);

    /// Payloads with an unknown packet type byte.
    pub const PACKETS_UNKNOWN: Metric = Metric::counter("obc.packet.unknown")
        .with_description("Frames whose payload type is unknown")
        .with_unit(Unit::Count);

    // ========================================================================
    // Commands
    // ========================================================================

    /// Commands handed to the link.
    ///
    /// Labels: command, mode (`immediate` or `scheduled`)
    pub const COMMANDS_SENT: Metric = Metric::counter("obc.command.sent")
        .with_description("Commands sent")
        .with_unit(Unit::Count)
        .with_labels(&["command", "mode"]);

    /// Commands that ended in an error.
    pub const COMMAND_ERRORS: Metric = Metric::counter("obc.command.errors")
        .with_description("Commands that failed")
        .with_unit(Unit::Count)
        .with_labels(&["command", "error"]);

    /// Time from sending a command to its immediate response.
    pub const COMMAND_ROUND_TRIP: Metric = Metric::histogram("obc.command.round_trip_us")
        .with_description("Immediate command round-trip time")
        .with_unit(Unit::Microseconds)
        .with_labels(&["command"]);

    /// Responses whose sequence number did not match the outstanding command.
    pub const RESPONSES_DISCARDED: Metric = Metric::counter("obc.command.responses_discarded")
        .with_description("Stale or mismatched responses discarded")
        .with_unit(Unit::Count);

    // ========================================================================
    // Scheduled responses
    // ========================================================================

    /// Scheduled commands waiting for their response.
    pub const SCHEDULED_PENDING: Metric = Metric::gauge("obc.scheduled.pending")
        .with_description("Scheduled commands awaiting a response")
        .with_unit(Unit::Count);

    /// Scheduled responses whose uuid matched nothing.
    pub const SCHEDULED_UNMATCHED: Metric = Metric::counter("obc.scheduled.unmatched")
        .with_description("Scheduled responses with no pending command")
        .with_unit(Unit::Count);

    // ========================================================================
    // Logs
    // ========================================================================

    /// Log entries received.
    pub const LOGS_RECEIVED: Metric = Metric::counter("obc.log.received")
        .with_description("Log entries received")
        .with_unit(Unit::Count)
        .with_labels(&["group"]);

    /// Log entries dropped because a listener queue was full.
    pub const LOGS_DROPPED: Metric = Metric::counter("obc.log.dropped")
        .with_description("Log entries dropped at a full listener")
        .with_unit(Unit::Count);

    pub const ALL: &[&Metric] = &[
        &LINK_RX_BYTES,
        &LINK_TX_BYTES,
        &LINK_IO_ERRORS,
        &FRAMES_RECEIVED,
        &FRAME_ERRORS,
        &PACKETS_UNKNOWN,
        &COMMANDS_SENT,
        &COMMAND_ERRORS,
        &COMMAND_ROUND_TRIP,
        &RESPONSES_DISCARDED,
        &SCHEDULED_PENDING,
        &SCHEDULED_UNMATCHED,
        &LOGS_RECEIVED,
        &LOGS_DROPPED,
    ];
}

/// Labels identifying one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLabels {
    /// Link kind (`serial` or `comms`).
    pub link: String,
    /// Device address.
    pub address: String,
}

impl LinkLabels {
    pub fn new(link: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            address: address.into(),
        }
    }

    /// Labels in the form the `metrics` macros accept.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("link", self.link.clone()), ("address", self.address.clone())]
    }

    /// Labels with extra key-value pairs appended.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Register every metric description. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_labels() {
        let labels = LinkLabels::new("comms", "10.0.0.2:4000");
        assert_eq!(
            labels.to_labels(),
            vec![("link", "comms".to_string()), ("address", "10.0.0.2:4000".to_string())]
        );

        let extended = labels.with(&[("direction", "rx".to_string())]);
        assert_eq!(extended.len(), 3);
        assert!(extended.contains(&("direction", "rx".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::FRAME_ERRORS.name, "obc.frame.errors");
        assert_eq!(metric_defs::FRAME_ERRORS.labels, &["format", "reason"]);
        assert_eq!(metric_defs::SCHEDULED_PENDING.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::COMMAND_ROUND_TRIP.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::COMMAND_ROUND_TRIP.unit, Some(Unit::Microseconds));
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
