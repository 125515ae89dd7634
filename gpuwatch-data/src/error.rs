use crate::source::Document;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure fetching a single source [`Document`].
///
/// Every variant is recoverable: callers substitute synthesised data. See
/// [`select_compute`](crate::fallback::select_compute).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum FetchError {
    #[error("document parsed but contained no usable data")]
    Empty,

    #[error("HTTP error status: {status}")]
    Http { status: u16 },

    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("network failure: {0}")]
    Network(String),
}

impl FetchError {
    /// Map onto the pipeline-level [`SourceErrorKind`] taxonomy.
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            FetchError::Empty => SourceErrorKind::SourceEmpty,
            FetchError::Http { .. } | FetchError::Network(_) => SourceErrorKind::SourceUnavailable,
            FetchError::Parse(_) => SourceErrorKind::SourceMalformed,
        }
    }
}

/// Why a source was substituted with synthesised data.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, derive_more::Display,
)]
pub enum SourceErrorKind {
    /// Network or HTTP failure.
    SourceUnavailable,
    /// JSON parse failure or wrong document shape.
    SourceMalformed,
    /// Valid JSON, but zero usable records after validation.
    SourceEmpty,
}

/// Why an individual record was dropped by the normaliser.
///
/// Not a pipeline error, just a per-record skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum RejectReason {
    #[error("record is not a JSON object: {0}")]
    Malformed(String),

    #[error("{field} is missing or null")]
    MissingPrice { field: &'static str },

    #[error("{field} is not numeric: {value}")]
    NonNumeric { field: &'static str, value: String },

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("unsupported currency: {0}")]
    UnknownCurrency(String),
}

/// Invalid [`PipelineConfig`](crate::config::PipelineConfig) value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid base url {url}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("{name} must be within {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: String,
    },

    #[error("failed to parse env var {key}={value}")]
    Env { key: &'static str, value: String },
}

/// Errors arising from the history ring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("push to unregistered history series: {0}")]
    UnknownSeries(String),
}

/// Hard failures that indicate a defect rather than bad external data.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("fallback synthesiser produced an empty {0} dataset")]
    FallbackEmpty(Document),

    #[error("history: {0}")]
    History(#[from] HistoryError),

    #[error("ticker task failed: {0}")]
    Ticker(String),

    #[error("server: {0}")]
    Server(String),
}
