//! Client configuration

use std::time::Duration;

/// Default `Accept-Language` value
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Connection settings for a [`crate::Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend root, e.g. `http://127.0.0.1:8090`; may carry a path prefix
    pub base_url: String,
    /// Sent as `Accept-Language` unless a request sets its own
    pub language: String,
    pub user_agent: String,
    /// Whole-request timeout; `None` leaves requests unbounded
    pub timeout: Option<Duration>,
    pub realtime: RealtimeConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            user_agent: concat!("pb-rest-client/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: None,
            realtime: RealtimeConfig::default(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = realtime;
        self
    }
}

/// Realtime stream settings
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// How long to wait for the server-assigned client id after opening a stream
    pub connect_timeout: Duration,
    /// First reconnect delay; doubled after every failed attempt
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    /// Delay before reconnect attempt number `attempt` (starting at 0)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}
