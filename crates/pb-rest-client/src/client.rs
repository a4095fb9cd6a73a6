//! Main REST API client implementation

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use pb_api_contract::{ApiErrorBody, AuthResponse, HealthResponse};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION};
use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AuthProvider, AuthStore};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::hooks::{Middleware, RequestHook, ResponseHook};
use crate::multipart;
use crate::query::{join_url, QueryParams};
use crate::records::{auth_path, RecordService, AUTH_REFRESH, AUTH_WITH_PASSWORD};
use crate::request::ApiRequest;

/// Health check endpoint
pub const HEALTH_PATH: &str = "/api/health";

/// REST API client for a PocketBase backend.
///
/// Cheap to clone; clones share the HTTP connection pool, auth state and
/// middleware.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: HttpClient,
    config: ClientConfig,
    language: HeaderValue,
    auth: Arc<dyn AuthProvider>,
    middleware: Middleware,
    refresh_collection: Option<String>,
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    auth: Arc<dyn AuthProvider>,
    middleware: Middleware,
    http: Option<HttpClient>,
    refresh_collection: Option<String>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            auth: Arc::new(AuthStore::new()),
            middleware: Middleware::new(),
            http: None,
            refresh_collection: None,
        }
    }

    /// Auth state consulted on every request
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    pub fn before_send(mut self, hook: impl RequestHook + 'static) -> Self {
        self.middleware = self.middleware.before_send(hook);
        self
    }

    pub fn after_send(mut self, hook: impl ResponseHook + 'static) -> Self {
        self.middleware = self.middleware.after_send(hook);
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware = middleware;
        self
    }

    /// On a `401` for a request sent with the stored token, call
    /// `auth-refresh` on `collection` once and replay the request once.
    pub fn refresh_auth_on_401(mut self, collection: impl Into<String>) -> Self {
        self.refresh_collection = Some(collection.into());
        self
    }

    /// Reuse an existing `reqwest` client instead of building one
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ClientResult<Client> {
        Url::parse(&self.config.base_url)?;
        let language = HeaderValue::from_str(&self.config.language)
            .map_err(|e| ClientError::InvalidHeader(format!("accept-language: {e}")))?;

        let http = match self.http {
            Some(http) => http,
            None => {
                let mut builder = HttpClient::builder().user_agent(self.config.user_agent.clone());
                if let Some(timeout) = self.config.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build().map_err(|e| ClientError::Transport {
                    method: Method::GET,
                    url: self.config.base_url.clone(),
                    status: None,
                    message: format!("failed to create HTTP client: {e}"),
                })?
            }
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                http,
                config: self.config,
                language,
                auth: self.auth,
                middleware: self.middleware,
                refresh_collection: self.refresh_collection,
            }),
        })
    }
}

impl Client {
    /// Create a client with default auth state and no hooks
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        ClientBuilder::new(config).build()
    }

    /// Create a client from a base URL string
    pub fn from_url(base_url: &str) -> ClientResult<Self> {
        Self::new(ClientConfig::new(base_url))
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.inner.auth
    }

    /// Record CRUD handle for `collection`
    pub fn collection(&self, collection: impl Into<String>) -> RecordService<'_> {
        RecordService::new(self, collection)
    }

    /// `GET /api/health`
    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.send_json(ApiRequest::get(HEALTH_PATH)).await
    }

    /// Base URL plus `path` (one separating slash) plus the rendered query
    pub fn build_url(&self, path: &str, query: Option<&QueryParams>) -> ClientResult<Url> {
        Ok(join_url(&self.inner.config.base_url, path, query)?)
    }

    /// Send a request whose response body is not needed
    pub async fn send(&self, request: ApiRequest) -> ClientResult<()> {
        self.execute(&request).await.map(drop)
    }

    /// Send a request and decode the response body into `T`.
    ///
    /// An empty body decodes as JSON `null`, so `Option<T>` and `()` work for
    /// endpoints that answer `204 No Content`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        self.send_decoded(request).await.map(|decoded| decoded.value)
    }

    pub(crate) async fn send_decoded<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> ClientResult<Decoded<T>> {
        let sent = self.execute(&request).await?;
        read_json(sent, &request.cancellation()).await
    }

    /// Exchange the stored token for a fresh one and save the result.
    ///
    /// Never triggers a further refresh, whatever the response status.
    pub(crate) async fn refresh_auth(
        &self,
        collection: &str,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<Decoded<AuthResponse>> {
        let mut request = ApiRequest::post(auth_path(collection, AUTH_REFRESH));
        if let Some(cancel) = cancel {
            request = request.cancel_on(cancel);
        }
        let sent = self.execute_once(&request).await?;
        let decoded: Decoded<AuthResponse> = read_json(sent, &request.cancellation()).await?;
        self.inner
            .auth
            .save(decoded.value.token.clone(), Some(decoded.value.record.clone()));
        Ok(decoded)
    }

    /// Open a GET response as a byte stream without buffering the payload
    pub async fn get_stream(
        &self,
        path: &str,
        query: Option<&QueryParams>,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<ByteStream> {
        let mut request = ApiRequest::get(path);
        if let Some(query) = query {
            request = request.query_params(query.clone());
        }
        if let Some(cancel) = cancel {
            request = request.cancel_on(cancel);
        }

        let cancel = request.cancellation();
        let Sent { method, url, response } = self.execute(&request).await?;
        Ok(ByteStream::new(method, url, response, cancel))
    }

    /// Headers sent with every request: caller headers first, then
    /// `Authorization` and `Accept-Language` where the caller left them out.
    pub(crate) fn default_headers(&self, caller: &HeaderMap) -> ClientResult<HeaderMap> {
        let mut headers = caller.clone();
        if !headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.inner.auth.token() {
                let value = HeaderValue::from_str(&token)
                    .map_err(|e| ClientError::InvalidHeader(format!("authorization: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
        }
        if !headers.contains_key(ACCEPT_LANGUAGE) {
            headers.insert(ACCEPT_LANGUAGE, self.inner.language.clone());
        }
        Ok(headers)
    }

    fn build_request(&self, request: &ApiRequest, url: Url) -> ClientResult<reqwest::Request> {
        let headers = self.default_headers(&request.headers)?;
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url.clone())
            .headers(headers);

        if !request.files.is_empty() {
            builder = builder.multipart(multipart::build_form(&request.body, &request.files)?);
        } else if !request.body.is_empty() {
            builder = builder.json(&request.body);
        }

        builder
            .build()
            .map_err(|e| ClientError::transport(request.method.clone(), url.as_str(), e))
    }

    async fn execute(&self, request: &ApiRequest) -> ClientResult<Sent> {
        match self.execute_once(request).await {
            Err(err) => match self.refresh_target(request, &err) {
                Some(collection) => {
                    debug!(collection, path = %request.path, "token rejected, refreshing auth");
                    let refreshed = self.refresh_auth(collection, request.cancel.clone()).await;
                    if let Err(refresh_err) = refreshed {
                        warn!(collection, error = %refresh_err, "auth refresh failed");
                        return Err(if refresh_err.is_cancelled() { refresh_err } else { err });
                    }
                    self.execute_once(request).await
                }
                None => Err(err),
            },
            sent => sent,
        }
    }

    /// Collection to refresh against when `err` is a rejected stored token
    fn refresh_target(&self, request: &ApiRequest, err: &ClientError) -> Option<&str> {
        let collection = self.inner.refresh_collection.as_deref()?;
        let rejected = err.status() == Some(StatusCode::UNAUTHORIZED)
            && !request.headers.contains_key(AUTHORIZATION)
            && !is_auth_call(&request.path)
            && self.inner.auth.token().is_some();
        rejected.then_some(collection)
    }

    async fn execute_once(&self, request: &ApiRequest) -> ClientResult<Sent> {
        let url = self.build_url(&request.path, Some(&request.query))?;
        let http_request = self.build_request(request, url)?;
        let http_request = self.inner.middleware.apply(http_request);

        let method = http_request.method().clone();
        let url = http_request.url().to_string();
        let cancel = request.cancellation();

        debug!(%method, %url, "sending request");
        let response = cancellable(&cancel, self.inner.http.execute(http_request))
            .await
            .ok_or_else(|| ClientError::cancelled(method.clone(), url.clone()))?
            .map_err(|e| ClientError::transport(method.clone(), url.clone(), e))?;

        self.inner.middleware.observe(&response);

        let status = response.status();
        debug!(%method, %url, status = status.as_u16(), "received response");

        if status.as_u16() >= 400 {
            let details = cancellable(&cancel, response.json::<ApiErrorBody>())
                .await
                .and_then(Result::ok);
            return Err(ClientError::Protocol {
                method,
                url,
                status,
                details,
            });
        }

        Ok(Sent {
            method,
            url,
            response,
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.config.base_url)
            .field("language", &self.inner.config.language)
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}

struct Sent {
    method: Method,
    url: String,
    response: Response,
}

/// A decoded body together with the request it answered
pub(crate) struct Decoded<T> {
    pub(crate) value: T,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) status: StatusCode,
}

async fn read_json<T: DeserializeOwned>(
    sent: Sent,
    cancel: &CancellationToken,
) -> ClientResult<Decoded<T>> {
    let Sent { method, url, response } = sent;
    let status = response.status();

    let bytes = cancellable(cancel, response.bytes())
        .await
        .ok_or_else(|| ClientError::cancelled(method.clone(), url.clone()))?
        .map_err(|e| ClientError::transport(method.clone(), url.clone(), e))?;

    match decode_body(&bytes) {
        Ok(value) => Ok(Decoded {
            value,
            method,
            url,
            status,
        }),
        Err(e) => Err(ClientError::Decode {
            method,
            url,
            status,
            message: e.to_string(),
        }),
    }
}

fn is_auth_call(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    path.ends_with(AUTH_REFRESH) || path.ends_with(AUTH_WITH_PASSWORD)
}

/// Race `fut` against `cancel`; `None` means the token fired first.
pub(crate) async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(bytes)
    }
}

/// Streaming response body
pub struct ByteStream {
    inner: BoxStream<'static, ClientResult<Bytes>>,
}

impl ByteStream {
    fn new(method: Method, url: String, response: Response, cancel: CancellationToken) -> Self {
        let chunks = response.bytes_stream().boxed();
        let inner = stream::unfold(Some(chunks), move |state| {
            let cancel = cancel.clone();
            let method = method.clone();
            let url = url.clone();
            async move {
                let mut chunks = state?;
                match cancellable(&cancel, chunks.next()).await {
                    None => Some((Err(ClientError::cancelled(method, url)), None)),
                    Some(None) => None,
                    Some(Some(chunk)) => {
                        let chunk = chunk.map_err(|e| ClientError::transport(method, url, e));
                        Some((chunk, Some(chunks)))
                    }
                }
            }
        })
        .boxed();
        Self { inner }
    }

    /// Collect the remaining chunks into one buffer
    pub async fn collect_bytes(mut self) -> ClientResult<Vec<u8>> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

impl Stream for ByteStream {
    type Item = ClientResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderName;

    #[test]
    fn test_client_creation() {
        let client = Client::from_url("http://localhost:8090").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8090");
        assert_eq!(client.config().language, "en-US");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = Client::from_url("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[test]
    fn test_default_headers_respect_caller_values() {
        let client = Client::builder(ClientConfig::new("http://localhost:8090").with_language("de-DE"))
            .auth(Arc::new(AuthStore::with_token("store-token")))
            .build()
            .unwrap();

        let headers = client.default_headers(&HeaderMap::new()).unwrap();
        assert_eq!(headers[AUTHORIZATION], "store-token");
        assert_eq!(headers[ACCEPT_LANGUAGE], "de-DE");

        let mut caller = HeaderMap::new();
        caller.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("caller-token"),
        );
        caller.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));
        let headers = client.default_headers(&caller).unwrap();
        assert_eq!(headers[AUTHORIZATION], "caller-token");
        assert_eq!(headers[ACCEPT_LANGUAGE], "fr");
    }

    #[test]
    fn test_no_authorization_without_valid_token() {
        let client = Client::from_url("http://localhost:8090").unwrap();
        let headers = client.default_headers(&HeaderMap::new()).unwrap();
        assert!(!headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_auth_calls_are_never_refreshed() {
        assert!(is_auth_call("/api/collections/users/auth-refresh"));
        assert!(is_auth_call("/api/collections/users/auth-with-password/"));
        assert!(!is_auth_call("/api/collections/users/records"));
    }

    #[test]
    fn test_decode_body_treats_empty_as_null() {
        let value: Option<Value> = decode_body(b"  ").unwrap();
        assert!(value.is_none());
        let () = decode_body(b"").unwrap();
        assert!(decode_body::<u32>(b"").is_err());
    }
}
