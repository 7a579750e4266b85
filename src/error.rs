use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the acquisition and enrichment pipeline.
#[derive(Debug, Error)]
pub enum ScoutError {
    /// The listing site could not be reached or answered with a non-2xx status.
    #[error("listing site unavailable: {reason}")]
    UpstreamUnavailable { status: Option<u16>, reason: String },

    /// An embedded payload could not be extracted or parsed.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Every endpoint of an enrichment service failed.
    #[error("{service} unavailable: {reason}")]
    EnrichmentUnavailable { service: String, reason: String },

    /// Caller-supplied input was rejected.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {url}")]
    RateLimited { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScoutError {
    /// Status code an HTTP surface should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::UpstreamUnavailable { .. } => 502,
            Self::EnrichmentUnavailable { .. } => 503,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
