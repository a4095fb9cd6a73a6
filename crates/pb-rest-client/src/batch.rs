//! Batch aggregation of record mutations into one `POST /api/batch` call
//!
//! Operations run server-side in the order they were added and the response
//! array is index-aligned with them. A later operation cannot reference an
//! id generated by an earlier one in the same batch; create the parent in a
//! separate call first.

use pb_api_contract::{
    ApiContractError, BatchPayload, BatchRequestItem, BatchResponseItem, RecordBody,
};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Index;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::query::{encode, encode_segment};
use crate::records::records_path;
use crate::request::ApiRequest;

/// Path of the batch endpoint
pub const BATCH_PATH: &str = "/api/batch";

/// Kind of record mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMethod {
    Create,
    Update,
    Upsert,
    Delete,
}

impl BatchMethod {
    pub fn http_method(self) -> Method {
        match self {
            BatchMethod::Create => Method::POST,
            BatchMethod::Update => Method::PATCH,
            BatchMethod::Upsert => Method::PUT,
            BatchMethod::Delete => Method::DELETE,
        }
    }
}

/// One queued mutation
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    method: BatchMethod,
    collection: String,
    record_id: Option<String>,
    body: Map<String, Value>,
    expand: Option<String>,
    headers: BTreeMap<String, String>,
}

impl BatchOperation {
    fn new(
        method: BatchMethod,
        collection: impl Into<String>,
        record_id: Option<String>,
        body: Map<String, Value>,
    ) -> Self {
        Self {
            method,
            collection: collection.into(),
            record_id,
            body,
            expand: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn create<T: RecordBody>(collection: impl Into<String>, record: &T) -> ClientResult<Self> {
        Ok(Self::new(BatchMethod::Create, collection, None, record.to_body()?))
    }

    pub fn update<T: RecordBody>(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        record: &T,
    ) -> ClientResult<Self> {
        Ok(Self::new(
            BatchMethod::Update,
            collection,
            Some(record_id.into()),
            record.to_body()?,
        ))
    }

    /// Create-or-replace; the id travels in the body since the URL has none
    pub fn upsert<T: RecordBody>(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        record: &T,
    ) -> ClientResult<Self> {
        let record_id = record_id.into();
        let mut body = record.to_body()?;
        body.insert("id".to_string(), Value::String(record_id.clone()));
        Ok(Self::new(BatchMethod::Upsert, collection, Some(record_id), body))
    }

    pub fn delete(collection: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(
            BatchMethod::Delete,
            collection,
            Some(record_id.into()),
            Map::new(),
        )
    }

    /// Ask the server to expand relations in this operation's response
    pub fn expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into()).filter(|expand: &String| !expand.is_empty());
        self
    }

    /// Header sent with this sub-request only
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(&self) -> BatchMethod {
        self.method
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Sub-request URL, relative to the backend root
    pub fn url(&self) -> String {
        let mut url = records_path(&self.collection);
        if let (BatchMethod::Update | BatchMethod::Delete, Some(id)) = (self.method, &self.record_id) {
            url.push('/');
            url.push_str(&encode_segment(id));
        }
        if let Some(expand) = &self.expand {
            url.push_str("?expand=");
            url.push_str(&encode(expand));
        }
        url
    }

    pub fn to_request_item(&self) -> BatchRequestItem {
        BatchRequestItem {
            method: self.method.http_method().to_string(),
            url: self.url(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// Ordered list of operations submitted as one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    operations: Vec<BatchOperation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: BatchOperation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn create<T: RecordBody>(
        &mut self,
        collection: impl Into<String>,
        record: &T,
    ) -> ClientResult<&mut Self> {
        Ok(self.push(BatchOperation::create(collection, record)?))
    }

    pub fn update<T: RecordBody>(
        &mut self,
        collection: impl Into<String>,
        record_id: impl Into<String>,
        record: &T,
    ) -> ClientResult<&mut Self> {
        Ok(self.push(BatchOperation::update(collection, record_id, record)?))
    }

    pub fn upsert<T: RecordBody>(
        &mut self,
        collection: impl Into<String>,
        record_id: impl Into<String>,
        record: &T,
    ) -> ClientResult<&mut Self> {
        Ok(self.push(BatchOperation::upsert(collection, record_id, record)?))
    }

    pub fn delete(
        &mut self,
        collection: impl Into<String>,
        record_id: impl Into<String>,
    ) -> &mut Self {
        self.push(BatchOperation::delete(collection, record_id))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Wire payload; fails locally when nothing was queued
    pub fn payload(&self) -> ClientResult<BatchPayload> {
        if self.operations.is_empty() {
            return Err(ClientError::NoOperations);
        }
        Ok(BatchPayload {
            requests: self
                .operations
                .iter()
                .map(BatchOperation::to_request_item)
                .collect(),
        })
    }

    pub(crate) fn to_request(
        &self,
        headers: HeaderMap,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<ApiRequest> {
        let payload = self.payload()?;
        let body = match serde_json::to_value(&payload).map_err(ApiContractError::from)? {
            Value::Object(body) => body,
            _ => Map::new(),
        };

        let mut request = ApiRequest::post(BATCH_PATH).headers(headers).body(body);
        if let Some(cancel) = cancel {
            request = request.cancel_on(cancel);
        }
        Ok(request)
    }
}

/// Per-operation outcomes, index-aligned with the submitted operations.
///
/// Individual items may have failed even though the batch call succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    items: Vec<BatchResponseItem>,
}

impl BatchResponse {
    pub fn items(&self) -> &[BatchResponseItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<BatchResponseItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BatchResponseItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchResponseItem> {
        self.items.iter()
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(BatchResponseItem::is_success)
    }

    /// Failed items with their operation index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &BatchResponseItem)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_success())
    }
}

impl Index<usize> for BatchResponse {
    type Output = BatchResponseItem;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl IntoIterator for BatchResponse {
    type Item = BatchResponseItem;
    type IntoIter = std::vec::IntoIter<BatchResponseItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchResponse {
    type Item = &'a BatchResponseItem;
    type IntoIter = std::slice::Iter<'a, BatchResponseItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Client {
    /// Submit every queued operation as one call
    pub async fn send_batch(&self, batch: &Batch) -> ClientResult<BatchResponse> {
        self.send_batch_with(batch, HeaderMap::new(), None).await
    }

    /// Submit with extra headers on the outer call and an optional cancel token
    pub async fn send_batch_with(
        &self,
        batch: &Batch,
        headers: HeaderMap,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<BatchResponse> {
        let request = batch.to_request(headers, cancel)?;
        let decoded = self.send_decoded::<Vec<BatchResponseItem>>(request).await?;

        if decoded.value.len() != batch.len() {
            warn!(
                expected = batch.len(),
                received = decoded.value.len(),
                "batch response is not aligned with its requests"
            );
            return Err(ClientError::Decode {
                method: decoded.method,
                url: decoded.url,
                status: decoded.status,
                message: format!(
                    "expected {} batch results, received {}",
                    batch.len(),
                    decoded.value.len()
                ),
            });
        }

        let response = BatchResponse {
            items: decoded.value,
        };
        debug!(
            operations = response.len(),
            failed = response.failures().count(),
            "batch completed"
        );
        Ok(response)
    }
}
