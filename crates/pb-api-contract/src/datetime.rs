//! Wire date/time codec
//!
//! The backend expects UTC timestamps written as `2024-01-15 10:30:00.000Z`
//! and returns them the same way (or as an empty string when unset). Domain
//! types opt in per field:
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Entry {
//!     #[serde(with = "pb_api_contract::datetime::wire")]
//!     due: DateTime<Utc>,
//! }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{ApiContractError, ApiContractResult};

/// `chrono` format string for outgoing values (`yyyy-MM-dd HH:mm:ss.fff'Z'`)
pub const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

// `%.f` accepts any number of fractional digits, including none.
const PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.fZ";

/// Format a UTC timestamp the way the backend stores it
pub fn format(value: &DateTime<Utc>) -> String {
    value.format(WIRE_FORMAT).to_string()
}

/// Parse either the backend form or an RFC 3339 timestamp
pub fn parse(value: &str) -> ApiContractResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, PARSE_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ApiContractError::InvalidDateTime {
            value: value.to_string(),
        })
}

/// `#[serde(with = "...")]` adapter for `DateTime<Utc>` fields
pub mod wire {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).map_err(D::Error::custom)
    }
}

/// `#[serde(with = "...")]` adapter for `Option<DateTime<Utc>>` fields.
/// Empty strings decode to `None`.
pub mod wire_option {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&super::format(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => {
                super::parse(&raw).map(Some).map_err(D::Error::custom)
            }
            _ => Ok(None),
        }
    }
}
