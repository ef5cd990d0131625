//! Snowflake IDs
//!
//! Parsing and inspection of the platform's Twitter-style IDs. The client
//! never mints IDs, the server does that, so this is the read side only:
//! turn the strings found in payloads into keys and timestamps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform epoch (2015-01-01T00:00:00.000Z), milliseconds.
const EPOCH_MS: u64 = 1420070400000;

/// A parsed snowflake ID.
///
/// Payloads carry these either as decimal strings (the usual JSON-safe form)
/// or as bare integers; both decode into the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Milliseconds since the Unix epoch at which this ID was generated.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> 22) + EPOCH_MS
    }

    /// Creation time as a UTC datetime.
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.timestamp_ms() as i64)
            .unwrap_or_else(chrono::Utc::now)
    }

    /// Extract an ID from a JSON value (string or integer form).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_u64().map(Snowflake),
            _ => None,
        }
    }

    /// Extract the `id` field of a JSON object payload.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        payload.get("id").and_then(Self::from_value)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Snowflake)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(raw: u64) -> Self {
        Snowflake(raw)
    }
}
