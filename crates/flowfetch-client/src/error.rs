use std::time::Duration;

use flowfetch_parse::ParseError;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

/// Failures raised by a [`Transport`](crate::Transport) or while reading its body
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to decompress body: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error(transparent)]
    Transport(TransportError),

    #[error("HTTP status {status}")]
    Status { status: StatusCode, headers: HeaderMap },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("Response body already consumed")]
    BodyConsumed,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Failed to decode body: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Decompress(io) => Self::Decode(io.to_string()),
            other => Self::Transport(other),
        }
    }
}

impl FetchError {
    /// The failure that ended the request, looking through retry exhaustion
    pub fn last(&self) -> &FetchError {
        match self {
            Self::RetriesExhausted { last, .. } => last.last(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.last(), Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.last(), Self::Timeout { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// HTTP status of the last response, if the failure was a status error
    pub fn status(&self) -> Option<StatusCode> {
        match self.last() {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
