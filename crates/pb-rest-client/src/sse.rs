//! Server-Sent Events source for the realtime channel

use async_trait::async_trait;
use eventsource_client as es;
use eventsource_client::Client as _;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// One named event received on the realtime stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeMessage {
    /// Event name; equals the topic it was published for
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

impl RealtimeMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id: None,
            data: data.into(),
        }
    }

    /// Decode the event payload, e.g. into `RecordEvent<T>`
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Stream of events from one SSE connection. It ends or yields an error
/// when the connection drops.
pub type SseStream = BoxStream<'static, ClientResult<RealtimeMessage>>;

/// Opens SSE connections for the realtime multiplexer
#[async_trait]
pub trait SseConnector: Send + Sync {
    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<SseStream>;
}

/// Default connector backed by `eventsource-client`.
///
/// Its built-in reconnection is switched off; the multiplexer decides when
/// to reconnect so it can re-announce topics on the new connection.
#[derive(Debug, Clone, Default)]
pub struct EventSourceConnector;

#[async_trait]
impl SseConnector for EventSourceConnector {
    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<SseStream> {
        let mut builder = es::ClientBuilder::for_url(url.as_str()).map_err(sse_error)?;
        for (name, value) in headers {
            let value = value
                .to_str()
                .map_err(|e| ClientError::InvalidHeader(format!("{}: {e}", name.as_str())))?;
            builder = builder.header(name.as_str(), value).map_err(sse_error)?;
        }

        let client = builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();

        let stream = client.stream().filter_map(|item| async move {
            match item {
                Ok(es::SSE::Event(event)) => Some(Ok(RealtimeMessage {
                    event: event.event_type,
                    id: event.id,
                    data: event.data,
                })),
                Ok(_) => None,
                Err(e) => Some(Err(sse_error(e))),
            }
        });

        Ok(stream.boxed())
    }
}

fn sse_error(err: es::Error) -> ClientError {
    ClientError::Realtime(format!("event stream: {err:?}"))
}
