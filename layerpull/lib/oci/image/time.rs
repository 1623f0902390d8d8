use std::fmt;

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How a missing timestamp is written.
const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A timestamp as found in image configs.
///
/// Written as RFC 3339 with the fractional seconds trimmed of trailing zeros, `Z` for a zero
/// offset, and [`ZERO_TIME`] when unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp(Option<DateTime<FixedOffset>>);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Timestamp {
    /// Wraps a concrete time.
    pub fn new(time: DateTime<FixedOffset>) -> Self {
        Self(Some(time))
    }

    /// Returns the wrapped time, or `None` for the zero time.
    pub fn get(&self) -> Option<&DateTime<FixedOffset>> {
        self.0.as_ref()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(time) = &self.0 else {
            return f.write_str(ZERO_TIME);
        };

        write!(f, "{}", time.format("%Y-%m-%dT%H:%M:%S"))?;

        let nanos = time.nanosecond() % 1_000_000_000;
        if nanos > 0 {
            let fraction = format!("{nanos:09}");
            write!(f, ".{}", fraction.trim_end_matches('0'))?;
        }

        let offset = time.offset().local_minus_utc();
        if offset == 0 {
            return f.write_str("Z");
        }

        let sign = if offset < 0 { '-' } else { '+' };
        let offset = offset.abs();
        write!(f, "{sign}{:02}:{:02}", offset / 3600, (offset % 3600) / 60)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = match Option::<String>::deserialize(deserializer)? {
            Some(raw) if raw != ZERO_TIME => raw,
            _ => return Ok(Self::default()),
        };

        DateTime::parse_from_rfc3339(&raw)
            .map(Self::new)
            .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
