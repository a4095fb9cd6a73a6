//! Realtime subscription multiplexer
//!
//! One SSE connection is shared by every topic listener. The topic table and
//! the connection handle live behind a single async mutex: subscribe,
//! unsubscribe and event dispatch are serialized against each other.
//!
//! Listeners are invoked one after another while that mutex is held, in
//! registration order. A listener must therefore never call back into the
//! multiplexer while it runs; spawn a task for that instead.

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use indexmap::IndexMap;
use pb_api_contract::{
    ApiContractError, RealtimeConnectPayload, RealtimeSubscriptionRequest, REALTIME_CONNECT_EVENT,
};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{cancellable, Client};
use crate::config::RealtimeConfig;
use crate::error::{ClientError, ClientResult};
use crate::request::ApiRequest;
use crate::sse::{EventSourceConnector, RealtimeMessage, SseConnector, SseStream};

/// Path of both the SSE stream and the announcement endpoint
pub const REALTIME_PATH: &str = "/api/realtime";

/// Lifecycle of the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

type Callback = dyn Fn(RealtimeMessage) -> BoxFuture<'static, ()> + Send + Sync;

/// A topic callback.
///
/// Clones share identity: subscribing a clone of an already registered
/// listener is a no-op, and any clone can be used to unsubscribe it.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<Callback>,
}

impl Listener {
    /// Wrap an async callback
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(RealtimeMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |message| callback(message).boxed()),
        }
    }

    /// Wrap a plain synchronous callback
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(RealtimeMessage) + Send + Sync + 'static,
    {
        Self::new(move |message| {
            callback(message);
            futures::future::ready(())
        })
    }

    pub fn same(&self, other: &Listener) -> bool {
        Arc::as_ptr(&self.callback) as *const () == Arc::as_ptr(&other.callback) as *const ()
    }

    async fn call(&self, message: RealtimeMessage) {
        (self.callback)(message).await
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("ptr", &(Arc::as_ptr(&self.callback) as *const ()))
            .finish()
    }
}

/// Shared SSE connection fanned out to named topic listeners
#[derive(Clone)]
pub struct Realtime {
    inner: Arc<Inner>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    client: Client,
    connector: Arc<dyn SseConnector>,
    config: RealtimeConfig,
    state: Mutex<State>,
}

struct State {
    topics: IndexMap<String, Vec<Listener>>,
    connection: Option<Connection>,
    phase: ConnectionState,
}

struct Connection {
    client_id: String,
    cancel: CancellationToken,
}

impl Realtime {
    /// Multiplexer using the default `eventsource-client` connector
    pub fn new(client: Client) -> Self {
        Self::with_connector(client, Arc::new(EventSourceConnector))
    }

    pub fn with_connector(client: Client, connector: Arc<dyn SseConnector>) -> Self {
        let config = client.config().realtime.clone();
        Self {
            inner: Arc::new(Inner {
                client,
                connector,
                config,
                state: Mutex::new(State {
                    topics: IndexMap::new(),
                    connection: None,
                    phase: ConnectionState::Disconnected,
                }),
            }),
            cancel: None,
        }
    }

    /// Handle on the same connection whose subscribe and unsubscribe calls
    /// give up once `token` fires.
    ///
    /// Cancelling aborts the caller's wait for the table lock, the handshake
    /// or the announcement. It never closes the shared connection.
    pub fn cancel_on(&self, token: CancellationToken) -> Realtime {
        Realtime {
            inner: self.inner.clone(),
            cancel: Some(token),
        }
    }

    async fn lock(&self) -> ClientResult<MutexGuard<'_, State>> {
        match &self.cancel {
            None => Ok(self.inner.state.lock().await),
            Some(cancel) => cancellable(cancel, self.inner.state.lock())
                .await
                .ok_or_else(|| self.inner.cancelled(Method::GET)),
        }
    }

    /// Register `listener` for `topic`.
    ///
    /// A new topic connects on first use and re-announces the topic set.
    /// Registering a listener already present for the topic does nothing.
    pub async fn subscribe(&self, topic: impl Into<String>, listener: Listener) -> ClientResult<()> {
        let topic = topic.into();
        let mut state = self.lock().await?;

        let added_topic = match state.topics.get_mut(&topic) {
            Some(listeners) => {
                if !listeners.iter().any(|existing| existing.same(&listener)) {
                    listeners.push(listener);
                }
                false
            }
            None => {
                state.topics.insert(topic.clone(), vec![listener]);
                true
            }
        };

        debug!(%topic, added_topic, "realtime subscribe");
        if added_topic || state.connection.is_none() {
            self.inner.submit(&mut state, self.cancel.as_ref()).await?;
        }
        Ok(())
    }

    /// Drop one topic with all its listeners, or every topic when `topic` is `None`
    pub async fn unsubscribe(&self, topic: Option<&str>) -> ClientResult<()> {
        let mut state = self.lock().await?;
        match topic {
            None => state.topics.clear(),
            Some(topic) => {
                if state.topics.shift_remove(topic).is_none() {
                    return Ok(());
                }
            }
        }
        self.inner.submit(&mut state, self.cancel.as_ref()).await
    }

    /// Drop every topic starting with `prefix`, announcing once
    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> ClientResult<()> {
        let mut state = self.lock().await?;
        let before = state.topics.len();
        state.topics.retain(|topic, _| !topic.starts_with(prefix));
        if state.topics.len() == before {
            return Ok(());
        }
        debug!(prefix, removed = before - state.topics.len(), "realtime unsubscribe by prefix");
        self.inner.submit(&mut state, self.cancel.as_ref()).await
    }

    /// Remove a single listener; the topic goes with its last listener
    pub async fn unsubscribe_listener(&self, topic: &str, listener: &Listener) -> ClientResult<()> {
        let mut state = self.lock().await?;
        let Some(listeners) = state.topics.get_mut(topic) else {
            return Ok(());
        };

        let before = listeners.len();
        listeners.retain(|existing| !existing.same(listener));
        if listeners.len() == before || !listeners.is_empty() {
            return Ok(());
        }

        state.topics.shift_remove(topic);
        self.inner.submit(&mut state, self.cancel.as_ref()).await
    }

    /// Registered topics in subscription order
    pub async fn topics(&self) -> Vec<String> {
        self.inner.state.lock().await.topics.keys().cloned().collect()
    }

    pub async fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.state.lock().await.phase
    }

    /// Server-assigned id of the live connection
    pub async fn client_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .connection
            .as_ref()
            .map(|connection| connection.client_id.clone())
    }
}

impl fmt::Debug for Realtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realtime")
            .field("base_url", &self.inner.client.base_url())
            .finish()
    }
}

impl Inner {
    /// Bring the connection in line with the topic table: disconnect when it
    /// is empty, otherwise connect if needed and announce the topic set.
    async fn submit(
        self: &Arc<Self>,
        state: &mut State,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<()> {
        if state.topics.is_empty() {
            disconnect(state);
            return Ok(());
        }

        if state.connection.is_none() {
            state.phase = ConnectionState::Connecting;
            let (client_id, stream) = match self.open(cancel).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "realtime connection failed");
                    state.phase = ConnectionState::Disconnected;
                    return Err(e);
                }
            };

            let cancel = CancellationToken::new();
            tokio::spawn(read_loop(Arc::downgrade(self), stream, cancel.clone()));
            info!(%client_id, "realtime connected");
            state.connection = Some(Connection { client_id, cancel });
            state.phase = ConnectionState::Connected;
        }

        self.announce(state, cancel).await
    }

    /// Open a stream and wait for the server to assign a client id
    async fn open(&self, cancel: Option<&CancellationToken>) -> ClientResult<(String, SseStream)> {
        let url = self.client.build_url(REALTIME_PATH, None)?;
        let headers = self.client.default_headers(&HeaderMap::new())?;
        let handshake = tokio::time::timeout(
            self.config.connect_timeout,
            self.handshake(&url, &headers),
        );

        let never = CancellationToken::new();
        match cancellable(cancel.unwrap_or(&never), handshake).await {
            None => Err(ClientError::cancelled(Method::GET, url.as_str())),
            Some(Err(_)) => Err(ClientError::Realtime(format!(
                "no client id received within {:?}",
                self.config.connect_timeout
            ))),
            Some(Ok(result)) => result,
        }
    }

    async fn handshake(&self, url: &Url, headers: &HeaderMap) -> ClientResult<(String, SseStream)> {
        let mut stream = self.connector.connect(url, headers).await?;
        while let Some(message) = stream.next().await {
            let message = message?;
            if message.event == REALTIME_CONNECT_EVENT {
                return Ok((connect_client_id(&message)?, stream));
            }
            debug!(event = %message.event, "ignoring event before connect");
        }
        Err(ClientError::Realtime(
            "stream ended before the server assigned a client id".to_string(),
        ))
    }

    /// Post the current topic set under the live client id.
    ///
    /// A failure leaves the table untouched; the next announcement retries.
    async fn announce(&self, state: &State, cancel: Option<&CancellationToken>) -> ClientResult<()> {
        let Some(connection) = &state.connection else {
            return Ok(());
        };
        let payload = RealtimeSubscriptionRequest {
            client_id: connection.client_id.clone(),
            subscriptions: state.topics.keys().cloned().collect(),
        };
        let body = match serde_json::to_value(&payload).map_err(ApiContractError::from)? {
            serde_json::Value::Object(body) => body,
            _ => serde_json::Map::new(),
        };

        let request = ApiRequest::post(REALTIME_PATH)
            .body(body)
            .cancel_on(connection.cancel.clone());
        let sent = match cancel {
            Some(cancel) => cancellable(cancel, self.client.send(request))
                .await
                .unwrap_or_else(|| Err(self.cancelled(Method::POST))),
            None => self.client.send(request).await,
        };
        match sent {
            Ok(()) => {
                debug!(topics = payload.subscriptions.len(), "realtime topics announced");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "realtime announcement failed");
                Err(e)
            }
        }
    }

    fn cancelled(&self, method: Method) -> ClientError {
        let url = self
            .client
            .build_url(REALTIME_PATH, None)
            .map(String::from)
            .unwrap_or_else(|_| REALTIME_PATH.to_string());
        ClientError::cancelled(method, url)
    }

    /// Deliver one event to the listeners of its topic, in order
    async fn dispatch(&self, message: RealtimeMessage, cancel: &CancellationToken) {
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return;
        }

        if message.event == REALTIME_CONNECT_EVENT {
            match connect_client_id(&message) {
                Ok(client_id) => {
                    if let Some(connection) = state.connection.as_mut() {
                        connection.client_id = client_id;
                    }
                    // Errors are already logged
                    let _ = self.announce(&state, None).await;
                }
                Err(e) => warn!(error = %e, "malformed connect event"),
            }
            return;
        }

        let Some(listeners) = state.topics.get(&message.event).cloned() else {
            return;
        };
        for listener in &listeners {
            listener.call(message.clone()).await;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(connection) = self.state.get_mut().connection.take() {
            connection.cancel.cancel();
        }
    }
}

fn disconnect(state: &mut State) {
    if let Some(connection) = state.connection.take() {
        connection.cancel.cancel();
        info!(client_id = %connection.client_id, "realtime disconnected");
    }
    state.phase = ConnectionState::Disconnected;
}

fn connect_client_id(message: &RealtimeMessage) -> ClientResult<String> {
    message
        .json::<RealtimeConnectPayload>()
        .map(|payload| payload.client_id)
        .map_err(|e| ClientError::Realtime(format!("invalid connect event: {e}")))
}

/// Read events until cancelled, reconnecting whenever the stream drops
async fn read_loop(inner: Weak<Inner>, mut stream: SseStream, cancel: CancellationToken) {
    loop {
        loop {
            let next = match cancellable(&cancel, stream.next()).await {
                Some(next) => next,
                None => return,
            };
            match next {
                Some(Ok(message)) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    inner.dispatch(message, &cancel).await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "realtime stream failed");
                    break;
                }
                None => {
                    warn!("realtime stream ended");
                    break;
                }
            }
        }

        match reconnect(&inner, &cancel).await {
            Some(next) => stream = next,
            None => return,
        }
    }
}

/// Retry with backoff until a new stream is up and announced
async fn reconnect(inner: &Weak<Inner>, cancel: &CancellationToken) -> Option<SseStream> {
    let mut attempt = 0u32;
    loop {
        let delay = {
            let inner = inner.upgrade()?;
            let mut state = inner.state.lock().await;
            if cancel.is_cancelled() {
                return None;
            }
            state.phase = ConnectionState::Reconnecting;
            inner.config.backoff(attempt)
        };
        cancellable(cancel, tokio::time::sleep(delay)).await?;

        let inner = inner.upgrade()?;
        match inner.open(Some(cancel)).await {
            Ok((client_id, stream)) => {
                let mut state = inner.state.lock().await;
                if cancel.is_cancelled() {
                    return None;
                }
                info!(%client_id, attempt, "realtime reconnected");
                if let Some(connection) = state.connection.as_mut() {
                    connection.client_id = client_id;
                }
                state.phase = ConnectionState::Connected;
                let _ = inner.announce(&state, None).await;
                return Some(stream);
            }
            Err(ClientError::Cancelled { .. }) => return None,
            Err(e) => {
                warn!(error = %e, attempt, "realtime reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
