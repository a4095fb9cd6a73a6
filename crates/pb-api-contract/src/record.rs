//! Record metadata and request-body schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiContractError, ApiContractResult};

/// Wire names assigned by the server; never sent back in request bodies.
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "created",
    "updated",
    "collectionId",
    "collectionName",
    "expand",
];

/// Server-assigned identity and audit fields shared by every record.
///
/// Domain types embed it with `#[serde(flatten)]` so the same struct decodes
/// responses and encodes request bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        with = "crate::datetime::wire_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "crate::datetime::wire_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

/// Static request-body schema for a domain type.
///
/// Wire names come from the type's `Serialize` impl, so renames are plain
/// `#[serde(rename = "...")]` attributes and date/time fields use
/// [`crate::datetime::wire`]. Implementors usually only write
/// `impl RecordBody for Todo {}`.
pub trait RecordBody: Serialize {
    /// Wire names stripped from the body before sending
    const EXCLUDED_FIELDS: &'static [&'static str] = SYSTEM_FIELDS;

    /// Flat property mapping without excluded or null fields
    fn to_body(&self) -> ApiContractResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map
                .into_iter()
                .filter(|(key, value)| {
                    !value.is_null() && !Self::EXCLUDED_FIELDS.contains(&key.as_str())
                })
                .collect()),
            other => Err(ApiContractError::NotAnObject(json_kind(&other))),
        }
    }
}

/// Raw maps pass through untouched apart from null removal.
impl RecordBody for Map<String, Value> {
    const EXCLUDED_FIELDS: &'static [&'static str] = &[];
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
