use thiserror::Error;

/// Longest payload excerpt kept inside a [`ParseError::Json`].
const SNIPPET_LEN: usize = 120;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Buffer overflow: frame of {len} bytes exceeds the {max} byte limit")]
    BufferOverflow { len: usize, max: usize },

    #[error("Invalid JSON payload ({source}): {snippet}")]
    Json {
        #[source]
        source: serde_json::Error,
        snippet: String,
    },

    #[error("Invalid UTF-8 in frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ParseError {
    /// Build a JSON error carrying a bounded excerpt of the offending payload.
    pub fn json(source: serde_json::Error, payload: &[u8]) -> Self {
        let end = payload.len().min(SNIPPET_LEN);
        Self::Json {
            source,
            snippet: String::from_utf8_lossy(&payload[..end]).into_owned(),
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::BufferOverflow { .. })
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
