//! Blocking facade over the async client
//!
//! Each [`Client`] owns a current-thread tokio runtime and drives the same
//! async code paths, so both variants behave identically. Do not call it from
//! inside an async runtime; `block_on` panics there.

use bytes::{Buf, Bytes};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::io::{self, Read};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::batch::{Batch, BatchResponse};
use crate::client::ByteStream;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::query::QueryParams;
use crate::request::ApiRequest;

/// Synchronous PocketBase client
#[derive(Debug, Clone)]
pub struct Client {
    inner: crate::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Self::from_async(crate::Client::new(config)?)
    }

    /// Wrap an already configured async client (hooks, auth provider)
    pub fn from_async(inner: crate::Client) -> ClientResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ClientError::Runtime)?;
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// The async client this facade drives
    pub fn as_async(&self) -> &crate::Client {
        &self.inner
    }

    pub fn build_url(&self, path: &str, query: Option<&QueryParams>) -> ClientResult<Url> {
        self.inner.build_url(path, query)
    }

    pub fn send(&self, request: ApiRequest) -> ClientResult<()> {
        self.runtime.block_on(self.inner.send(request))
    }

    pub fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        self.runtime.block_on(self.inner.send_json(request))
    }

    pub fn send_batch(&self, batch: &Batch) -> ClientResult<BatchResponse> {
        self.runtime.block_on(self.inner.send_batch(batch))
    }

    /// Blocking [`crate::Client::send_batch_with`]; another thread may fire `cancel`
    pub fn send_batch_with(
        &self,
        batch: &Batch,
        headers: HeaderMap,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<BatchResponse> {
        self.runtime
            .block_on(self.inner.send_batch_with(batch, headers, cancel))
    }

    /// Open a GET response as a reader that pulls chunks on demand
    pub fn get_stream(
        &self,
        path: &str,
        query: Option<&QueryParams>,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<StreamReader> {
        let stream = self
            .runtime
            .block_on(self.inner.get_stream(path, query, cancel))?;
        Ok(StreamReader {
            stream,
            runtime: self.runtime.clone(),
            chunk: Bytes::new(),
        })
    }
}

/// `std::io::Read` over a streamed response body
#[derive(Debug)]
pub struct StreamReader {
    stream: ByteStream,
    runtime: Arc<Runtime>,
    chunk: Bytes,
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.chunk.is_empty() {
            match self.runtime.block_on(self.stream.next()) {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
                None => return Ok(0),
            }
        }

        let len = buf.len().min(self.chunk.len());
        buf[..len].copy_from_slice(&self.chunk[..len]);
        self.chunk.advance(len);
        Ok(len)
    }
}
