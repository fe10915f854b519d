//! Timestamp normalization.
//!
//! Sensor payloads carry their timestamp either as epoch milliseconds or
//! as a date string. Both become a `DateTime<Utc>`; a missing timestamp
//! means "now".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A raw timestamp as it appears in a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// An RFC 3339 date-time string.
    Text(String),
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Timestamp::Millis(millis)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::Millis(dt.timestamp_millis())
    }
}

/// Convert a payload timestamp into a date-time.
///
/// `None` yields the current time. Values are converted as-is; future or
/// negative instants are accepted. Only unrepresentable values fail.
pub fn normalize(timestamp: Option<&Timestamp>) -> Result<DateTime<Utc>> {
    match timestamp {
        None => Ok(Utc::now()),
        Some(Timestamp::Millis(ms)) => DateTime::from_timestamp_millis(*ms)
            .ok_or_else(|| Error::Timestamp(format!("{} ms is out of range", ms))),
        Some(Timestamp::Text(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Timestamp(format!("'{}': {}", text, e))),
    }
}
