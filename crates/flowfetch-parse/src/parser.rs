use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, Result};

/// How a parser wants its input cut before it sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One call per line, empty lines included
    #[default]
    Lines,
    /// One call per blank-line separated block
    ///
    /// None of the bundled parsers use it; it serves custom parsers that
    /// want a whole message at once.
    Blocks,
    /// Raw chunks exactly as they arrive; the parser does its own buffering
    Raw,
}

/// What to do with a payload that fails to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseErrorPolicy {
    /// Log a warning and continue with the next frame
    #[default]
    Skip,
    /// Terminate the stream with the parse error
    Fail,
}

impl ParseErrorPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Fail
        } else {
            Self::Skip
        }
    }

    /// Route a payload failure: propagate it or log and swallow it
    pub fn handle(self, err: ParseError) -> Result<()> {
        match self {
            Self::Fail => Err(err),
            Self::Skip => {
                tracing::warn!(error = %err, "skipping unparseable payload");
                Ok(())
            }
        }
    }
}

/// Converts frames into typed values
///
/// `parse_frame` may emit any number of items into `out` and returns
/// [`ControlFlow::Break`] to end the stream (a termination marker was seen).
/// `finish` runs once at end of stream to flush buffered state.
pub trait FrameParser {
    type Item;

    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn parse_frame(
        &mut self,
        frame: &[u8],
        out: &mut VecDeque<Self::Item>,
    ) -> Result<ControlFlow<()>>;

    fn finish(&mut self, _out: &mut VecDeque<Self::Item>) -> Result<ControlFlow<()>> {
        Ok(ControlFlow::Continue(()))
    }
}

/// Line parser built from a closure, see [`from_fn`]
pub struct FnParser<F, T> {
    f: F,
    _item: PhantomData<fn() -> T>,
}

/// Build a line-framed parser from a closure
///
/// The closure returns `Ok(Some(item))` to emit, `Ok(None)` to skip the line.
///
/// ```
/// use flowfetch_parse::{from_fn, parse_all};
///
/// let parser = from_fn(|line: &[u8]| Ok((!line.is_empty()).then(|| line.len())));
/// assert_eq!(parse_all(parser, b"ab\n\nabc\n").unwrap(), vec![2, 3]);
/// ```
pub fn from_fn<F, T>(f: F) -> FnParser<F, T>
where
    F: FnMut(&[u8]) -> Result<Option<T>>,
{
    FnParser {
        f,
        _item: PhantomData,
    }
}

impl<F, T> FrameParser for FnParser<F, T>
where
    F: FnMut(&[u8]) -> Result<Option<T>>,
{
    type Item = T;

    fn parse_frame(&mut self, frame: &[u8], out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        if let Some(item) = (self.f)(frame)? {
            out.push_back(item);
        }
        Ok(ControlFlow::Continue(()))
    }
}
