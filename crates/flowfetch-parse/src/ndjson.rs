use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use serde::de::DeserializeOwned;

use crate::error::{ParseError, Result};
use crate::parser::{FrameParser, ParseErrorPolicy};

/// Newline-delimited JSON: one value per non-blank line
pub struct NdJsonParser<T> {
    done_marker: Option<String>,
    errors: ParseErrorPolicy,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> NdJsonParser<T> {
    pub fn new(errors: ParseErrorPolicy) -> Self {
        Self {
            done_marker: None,
            errors,
            _item: PhantomData,
        }
    }

    /// End the stream at a line equal to `marker` (surrounding whitespace ignored)
    pub fn with_done_marker(mut self, marker: Option<String>) -> Self {
        self.done_marker = marker;
        self
    }
}

impl<T: DeserializeOwned> Default for NdJsonParser<T> {
    fn default() -> Self {
        Self::new(ParseErrorPolicy::Skip)
    }
}

impl<T: DeserializeOwned> FrameParser for NdJsonParser<T> {
    type Item = T;

    fn parse_frame(&mut self, frame: &[u8], out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        let line = frame.trim_ascii();
        if line.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        if self.done_marker.as_deref().map(str::as_bytes) == Some(line) {
            tracing::debug!("NDJSON stream reached done marker");
            return Ok(ControlFlow::Break(()));
        }

        match serde_json::from_slice::<T>(line) {
            Ok(item) => out.push_back(item),
            Err(err) => self.errors.handle(ParseError::json(err, line))?,
        }
        Ok(ControlFlow::Continue(()))
    }
}
