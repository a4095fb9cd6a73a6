//! Request descriptors

use bytes::Bytes;
use pb_api_contract::RecordBody;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{Map, Value};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};
use crate::multipart::mime_for_file_name;
use crate::query::QueryParams;

/// Everything needed to issue one API call.
///
/// Built fresh per call and consumed by [`crate::Client::send`]. A non-empty
/// file list switches the body to multipart encoding; otherwise a non-empty
/// body map is sent as JSON.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: QueryParams,
    pub(crate) body: Map<String, Value>,
    pub(crate) files: Vec<FileAttachment>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: QueryParams::new(),
            body: Map::new(),
            files: Vec::new(),
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from plain strings, validating both parts
    pub fn try_header(self, name: &str, value: &str) -> ClientResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidHeader(format!("{}: {e}", name.as_str())))?;
        Ok(self.header(name, value))
    }

    /// Merge headers; later values replace earlier ones per name
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key, value);
        self
    }

    pub fn query_opt<V: ToString>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.query.insert_opt(key, value);
        self
    }

    pub fn query_params(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn body_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Use a domain record's wire mapping as the body
    pub fn record<T: RecordBody>(self, record: &T) -> ClientResult<Self> {
        Ok(self.body(record.to_body()?))
    }

    pub fn file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = FileAttachment>) -> Self {
        self.files.extend(files);
        self
    }

    /// Abort the call with [`ClientError::Cancelled`] once `token` fires
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn query_map(&self) -> &QueryParams {
        &self.query
    }

    pub fn body_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn attachments(&self) -> &[FileAttachment] {
        &self.files
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone().unwrap_or_default()
    }
}

/// A file uploaded as one multipart part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub field_name: String,
    pub file_name: String,
    pub content: Bytes,
}

impl FileAttachment {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Read a file from disk, naming the part after the file
    pub async fn from_path(
        field_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(field_name, file_name, content))
    }

    /// Files without a field name or file name are not sent
    pub fn is_attachable(&self) -> bool {
        !self.field_name.trim().is_empty() && !self.file_name.trim().is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for_file_name(&self.file_name)
    }
}
