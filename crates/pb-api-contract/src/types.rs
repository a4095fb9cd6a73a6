//! API contract types for the PocketBase REST and realtime endpoints

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One sub-request inside a batch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestItem {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body: Map<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Body of `POST /api/batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub requests: Vec<BatchRequestItem>,
}

/// One entry of the batch response array, index-aligned with the requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponseItem {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl BatchResponseItem {
    /// Whether this individual operation succeeded
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as an object, when the server returned one
    pub fn body_object(&self) -> Option<&Map<String, Value>> {
        self.body.as_object()
    }
}

/// Body of `POST /api/realtime`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSubscriptionRequest {
    pub client_id: String,
    pub subscriptions: Vec<String>,
}

/// Data of the `PB_CONNECT` event sent when a realtime stream opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConnectPayload {
    pub client_id: String,
}

/// Name of the event carrying [`RealtimeConnectPayload`]
pub const REALTIME_CONNECT_EVENT: &str = "PB_CONNECT";

/// Record change kinds delivered over realtime topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// Payload of a record topic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent<T> {
    pub action: RecordAction,
    pub record: T,
}

/// Paged list response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

/// Error body returned with 4xx/5xx responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Body of `auth-with-password` and `auth-refresh` responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse<T = Value> {
    pub token: String,
    pub record: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}
