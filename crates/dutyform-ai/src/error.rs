use std::time::Duration;

use thiserror::Error;

/// Transport-level failure talking to a completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Any failure of generative formula compilation.
///
/// Every variant renders with the same `formula generation failed` prefix;
/// callers treat them as one category and keep the variant for logging.
#[derive(Debug, Error)]
pub enum FormulaGenerationError {
    #[error("formula generation failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("formula generation failed: no response within {0:?}")]
    Timeout(Duration),
    #[error("formula generation failed: empty response")]
    EmptyResponse,
    #[error("formula generation failed: malformed response: {0}")]
    Malformed(String),
    #[error("formula generation failed: schema violation: {0}")]
    Schema(String),
    #[error("formula generation failed: unsafe formula {formula:?}: {reason}")]
    UnsafeFormula { formula: String, reason: String },
    #[error("formula generation failed: batch of {size} exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("formula generation failed: no generative provider configured")]
    NoProvider,
}
