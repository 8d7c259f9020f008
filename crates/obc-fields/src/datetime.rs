//! Epoch-relative timestamps used on the OBC wire.
//!
//! The OBC counts whole seconds from 2000-01-01T00:00:00Z in an unsigned
//! 32-bit register. Offset zero never denotes a real date: it is the
//! "execute immediately" marker in command headers.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Serialize, Serializer};

/// Unix time of the OBC epoch (2000-01-01T00:00:00Z).
pub const OBC_EPOCH_UNIX: i64 = 946_684_800;

/// Seconds since the OBC epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObcDateTime(u32);

impl ObcDateTime {
    /// Sentinel for "execute now".
    pub const IMMEDIATE: ObcDateTime = ObcDateTime(0);

    /// Wire size in bytes.
    pub const SIZE: usize = 4;

    /// Create from a raw epoch offset.
    pub const fn from_seconds(seconds: u32) -> Self {
        ObcDateTime(seconds)
    }

    /// Raw epoch offset.
    pub const fn seconds(self) -> u32 {
        self.0
    }

    /// Whether this is the immediate sentinel.
    pub const fn is_immediate(self) -> bool {
        self.0 == 0
    }

    /// Convert a UTC timestamp. Returns `None` for instants at or before the
    /// epoch, or beyond the 32-bit range.
    pub fn from_utc(dt: DateTime<Utc>) -> Option<Self> {
        let offset = dt.timestamp() - OBC_EPOCH_UNIX;
        if offset <= 0 {
            return None;
        }
        u32::try_from(offset).ok().map(ObcDateTime)
    }

    /// Convert to UTC. The immediate sentinel has no calendar date.
    pub fn to_utc(self) -> Option<DateTime<Utc>> {
        if self.is_immediate() {
            return None;
        }
        Utc.timestamp_opt(OBC_EPOCH_UNIX + i64::from(self.0), 0).single()
    }

    /// Current wall-clock time, saturating at the ends of the range.
    pub fn now() -> Self {
        let offset = Utc::now().timestamp() - OBC_EPOCH_UNIX;
        ObcDateTime(offset.clamp(1, i64::from(u32::MAX)) as u32)
    }

    /// Parse `now`/`immediate`, an RFC 3339 timestamp, or a raw offset.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("now") || text.eq_ignore_ascii_case("immediate") {
            return Ok(ObcDateTime::IMMEDIATE);
        }
        if let Ok(seconds) = text.parse::<u32>() {
            return Ok(ObcDateTime(seconds));
        }
        let dt = DateTime::parse_from_rfc3339(text).map_err(|e| e.to_string())?;
        ObcDateTime::from_utc(dt.with_timezone(&Utc))
            .ok_or_else(|| format!("{} is outside the OBC time range", text))
    }

    /// Big-endian wire bytes.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Read from big-endian wire bytes.
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        ObcDateTime(u32::from_be_bytes(bytes))
    }
}

impl From<u32> for ObcDateTime {
    fn from(seconds: u32) -> Self {
        ObcDateTime(seconds)
    }
}

impl std::fmt::Display for ObcDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_utc() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None if self.is_immediate() => write!(f, "immediate"),
            None => write!(f, "+{}s", self.0),
        }
    }
}

impl Serialize for ObcDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let obc = ObcDateTime::from_utc(dt).unwrap();
        assert_eq!(obc.to_utc(), Some(dt));
        assert!(!obc.is_immediate());
    }

    #[test]
    fn test_epoch_itself_is_not_a_date() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ObcDateTime::from_utc(epoch), None);
        assert_eq!(ObcDateTime::from_seconds(1).to_utc().unwrap(), epoch + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_parse() {
        assert_eq!(ObcDateTime::parse("now").unwrap(), ObcDateTime::IMMEDIATE);
        assert_eq!(ObcDateTime::parse("86400").unwrap().seconds(), 86400);
        let parsed = ObcDateTime::parse("2000-01-02T00:00:00Z").unwrap();
        assert_eq!(parsed.seconds(), 86400);
        assert!(ObcDateTime::parse("1999-12-31T00:00:00Z").is_err());
        assert!(ObcDateTime::parse("yesterday").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ObcDateTime::IMMEDIATE.to_string(), "immediate");
        assert_eq!(ObcDateTime::from_seconds(60).to_string(), "2000-01-01T00:01:00Z");
    }
}
