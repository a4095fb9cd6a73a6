//! Error types for contract-level conversions

use thiserror::Error;

/// Errors raised while turning domain values into wire bodies
#[derive(Debug, Error)]
pub enum ApiContractError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record body must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid date/time value {value:?}")]
    InvalidDateTime { value: String },
}

/// Result type alias for contract conversions
pub type ApiContractResult<T> = Result<T, ApiContractError>;
