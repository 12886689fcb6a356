use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use serde::de::DeserializeOwned;

use crate::error::{ParseError, Result};
use crate::parser::{FrameParser, Framing, ParseErrorPolicy};
use crate::ring::{RingBuffer, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY};
use crate::split::OverflowPolicy;

#[derive(Debug, Clone)]
pub struct JsonParserConfig {
    pub initial_capacity: usize,
    /// Longest single top-level value accepted
    pub max_value_len: usize,
    pub overflow: OverflowPolicy,
    pub errors: ParseErrorPolicy,
}

impl Default for JsonParserConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_value_len: DEFAULT_MAX_CAPACITY,
            overflow: OverflowPolicy::Error,
            errors: ParseErrorPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Outside,
    Opened,
    Inside,
    Closed,
}

/// Bracket depth tracker for one top-level value
#[derive(Debug, Default)]
struct Scanner {
    open: Option<u8>,
    depth: usize,
    in_string: bool,
    escape: bool,
}

impl Scanner {
    fn step(&mut self, byte: u8) -> Step {
        let Some(open) = self.open else {
            if byte == b'{' || byte == b'[' {
                self.open = Some(byte);
                self.depth = 1;
                return Step::Opened;
            }
            return Step::Outside;
        };

        if self.in_string {
            if self.escape {
                self.escape = false;
            } else if byte == b'\\' {
                self.escape = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return Step::Inside;
        }

        let close = if open == b'{' { b'}' } else { b']' };
        if byte == b'"' {
            self.in_string = true;
        } else if byte == open {
            self.depth += 1;
        } else if byte == close {
            self.depth -= 1;
            if self.depth == 0 {
                *self = Self::default();
                return Step::Closed;
            }
        }
        Step::Inside
    }

    fn is_inside(&self) -> bool {
        self.open.is_some()
    }
}

/// Extracts concatenated top-level JSON objects or arrays from raw chunks
///
/// Values may be separated by whitespace, newlines or nothing at all, and may
/// be split across chunks at any byte. Bytes between values are skipped.
/// Braces inside string literals are ignored, including escaped quotes.
pub struct JsonObjectParser<T> {
    buffer: RingBuffer,
    scanner: Scanner,
    /// Logical offset of the next unscanned byte
    scan: usize,
    max_value_len: usize,
    overflow: OverflowPolicy,
    errors: ParseErrorPolicy,
    /// Tracking the tail of an oversized value without buffering it
    discarding: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonObjectParser<T> {
    pub fn new(config: JsonParserConfig) -> Self {
        let max_value_len = config.max_value_len.max(1);
        Self {
            buffer: RingBuffer::with_capacity(config.initial_capacity, max_value_len),
            scanner: Scanner::default(),
            scan: 0,
            max_value_len,
            overflow: config.overflow,
            errors: config.errors,
            discarding: false,
            _item: PhantomData,
        }
    }

    fn scan(&mut self, out: &mut VecDeque<T>) -> Result<()> {
        while let Some(byte) = self.buffer.peek_byte(self.scan) {
            match self.scanner.step(byte) {
                Step::Outside | Step::Inside => self.scan += 1,
                Step::Opened => {
                    self.buffer.consume(self.scan);
                    self.scan = 1;
                }
                Step::Closed => {
                    let len = self.scan + 1;
                    self.emit(len, out)?;
                    self.buffer.consume(len);
                    self.scan = 0;
                }
            }
        }

        if !self.scanner.is_inside() {
            self.buffer.consume(self.scan);
            self.scan = 0;
        }
        Ok(())
    }

    fn emit(&self, len: usize, out: &mut VecDeque<T>) -> Result<()> {
        let Some(value) = self.buffer.view(0, len) else {
            return Ok(());
        };
        match serde_json::from_slice::<T>(&value) {
            Ok(item) => {
                out.push_back(item);
                Ok(())
            }
            Err(err) => self.errors.handle(ParseError::json(err, &value)),
        }
    }

    fn overflow(&mut self, incoming: usize) -> Result<()> {
        let len = self.buffer.len() + incoming;
        match self.overflow {
            OverflowPolicy::Error => Err(ParseError::BufferOverflow {
                len,
                max: self.max_value_len,
            }),
            OverflowPolicy::Skip => {
                tracing::warn!(
                    max = self.max_value_len,
                    "dropping JSON value larger than the buffer limit"
                );
                self.buffer.clear();
                self.scan = 0;
                self.discarding = true;
                Ok(())
            }
        }
    }
}

impl<T: DeserializeOwned> Default for JsonObjectParser<T> {
    fn default() -> Self {
        Self::new(JsonParserConfig::default())
    }
}

impl<T: DeserializeOwned> FrameParser for JsonObjectParser<T> {
    type Item = T;

    fn framing(&self) -> Framing {
        Framing::Raw
    }

    fn parse_frame(&mut self, chunk: &[u8], out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        let mut rest = chunk;

        while !rest.is_empty() {
            if self.discarding {
                match rest
                    .iter()
                    .position(|&b| self.scanner.step(b) == Step::Closed)
                {
                    Some(pos) => {
                        rest = &rest[pos + 1..];
                        self.discarding = false;
                        tracing::debug!("resynced after oversized JSON value");
                    }
                    None => break,
                }
                continue;
            }

            let room = self.max_value_len - self.buffer.len();
            if room == 0 {
                self.overflow(rest.len())?;
                continue;
            }

            let take = rest.len().min(room);
            self.buffer.write(&rest[..take])?;
            rest = &rest[take..];
            self.scan(out)?;
        }

        Ok(ControlFlow::Continue(()))
    }

    fn finish(&mut self, out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        let truncated = self.scanner.is_inside() && !self.discarding;
        let result = if truncated {
            self.emit(self.buffer.len(), out)
        } else {
            Ok(())
        };

        self.buffer.clear();
        self.scanner = Scanner::default();
        self.scan = 0;
        self.discarding = false;

        result.map(|()| ControlFlow::Continue(()))
    }
}
