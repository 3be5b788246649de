//! Error taxonomy for resolution. Only `NoImageData` and `Cancelled` escape the pipeline;
//! the other variants are absorbed by stage fallthrough.

use std::fmt;
use thiserror::Error;

/// Failure of a single HTTP attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Retryable HTTP status (5xx or 429).
    #[error("HTTP {status}")]
    Status { status: u16 },

    /// Failure reported by a non-reqwest transport.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether another attempt could succeed. Malformed requests (builder errors,
    /// bad redirects, undecodable bodies) fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            TransportError::Status { .. } | TransportError::Other(_) => true,
        }
    }
}

/// The fetcher could not be constructed.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid User-Agent header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Pipeline stage that recorded a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    TryApi,
    TryFetch,
    TryDirectMatch,
    TryDecode,
    TryLastResort,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::TryApi => "api",
            Stage::TryFetch => "fetch",
            Stage::TryDirectMatch => "direct-match",
            Stage::TryDecode => "decode",
            Stage::TryLastResort => "last-resort",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one stage did not produce images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Transport error: could not fetch {url} after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Could not parse {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("Could not decode obfuscated payload: {reason}")]
    Decode { reason: String },

    #[error("No image data for comic {comic_id} chapter {chapter_id} ({}).", summarize(.failures))]
    NoImageData {
        comic_id: String,
        chapter_id: String,
        failures: Vec<StageFailure>,
    },

    #[error("Resolution cancelled.")]
    Cancelled,
}

impl ResolveError {
    pub(crate) fn parse(context: impl Into<String>, reason: impl ToString) -> Self {
        ResolveError::Parse {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        ResolveError::Decode {
            reason: reason.into(),
        }
    }
}

fn summarize(failures: &[StageFailure]) -> String {
    if failures.is_empty() {
        return "no strategies ran".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
