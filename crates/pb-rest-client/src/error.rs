//! Error types for the PocketBase REST client

use pb_api_contract::{ApiContractError, ApiErrorBody};
use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Errors that can occur when using the REST client.
///
/// Every request-bound variant carries the method and resolved URL so a
/// failure can be reported without the original request at hand.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No HTTP response was obtained (connection refused, timeout, TLS)
    #[error("{method} request to {url} failed: {message}")]
    Transport {
        method: Method,
        url: String,
        status: Option<StatusCode>,
        message: String,
    },

    /// The server answered with a status of 400 or above
    #[error("{method} request to {url} resulted in {status}")]
    Protocol {
        method: Method,
        url: String,
        status: StatusCode,
        details: Option<ApiErrorBody>,
    },

    /// The response arrived but its body did not match the expected type
    #[error("{method} request to {url} returned an unreadable body ({status}): {message}")]
    Decode {
        method: Method,
        url: String,
        status: StatusCode,
        message: String,
    },

    #[error("{method} request to {url} was cancelled")]
    Cancelled { method: Method, url: String },

    #[error("No operations added to batch")]
    NoOperations,

    #[error("URL parsing error: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Record body error: {0}")]
    Contract(#[from] ApiContractError),

    #[error("Realtime error: {0}")]
    Realtime(String),

    /// The blocking facade could not start its runtime
    #[error("Runtime error: {0}")]
    Runtime(#[source] std::io::Error),
}

impl ClientError {
    pub(crate) fn transport(method: Method, url: impl Into<String>, err: reqwest::Error) -> Self {
        Self::Transport {
            method,
            url: url.into(),
            status: err.status(),
            message: err.to_string(),
        }
    }

    pub(crate) fn cancelled(method: Method, url: impl Into<String>) -> Self {
        Self::Cancelled {
            method,
            url: url.into(),
        }
    }

    /// HTTP method of the failed request, when one was issued
    pub fn method(&self) -> Option<&Method> {
        match self {
            Self::Transport { method, .. }
            | Self::Protocol { method, .. }
            | Self::Decode { method, .. }
            | Self::Cancelled { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Resolved URL of the failed request, when one was issued
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. }
            | Self::Protocol { url, .. }
            | Self::Decode { url, .. }
            | Self::Cancelled { url, .. } => Some(url),
            _ => None,
        }
    }

    /// HTTP status, absent for transport failures without a response
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::Protocol { status, .. } | Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Error body sent by the backend alongside a protocol failure
    pub fn details(&self) -> Option<&ApiErrorBody> {
        match self {
            Self::Protocol { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type alias for REST client operations
pub type ClientResult<T> = Result<T, ClientError>;
