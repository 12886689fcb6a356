//! Server-Sent Events field parser.
//!
//! Parsing state lives in a handful of accumulator fields rather than an
//! explicit state enum: pending data, pending event type and the sticky last
//! event id. Every transition is decided by the prefix of one line.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ParseError, Result};
use crate::parser::{FrameParser, ParseErrorPolicy};
use crate::ring::DEFAULT_MAX_CAPACITY;
use crate::split::OverflowPolicy;

/// Default stream termination sentinel used by OpenAI-style APIs
pub const DEFAULT_DONE_MARKER: &str = "[DONE]";

const DEFAULT_EVENT_TYPE: &str = "message";
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Payload of one dispatched event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    /// The joined data lines were valid JSON
    Json(Value),
    /// Raw joined data lines
    Text(String),
}

impl EventData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Collapse into a JSON value; raw text becomes a JSON string
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}

/// One dispatched Server-Sent Event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SseEvent {
    pub data: EventData,
    /// Event type, `"message"` unless an `event:` field said otherwise
    pub event: String,
    /// Last event id seen on the stream so far (sticky across events)
    pub id: String,
    /// `retry:` value sent in this event's block, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SseOptions {
    /// Try to decode the joined data as JSON, falling back to text
    pub parse_json: bool,
    /// Data payload that ends the stream without being emitted
    pub done_marker: Option<String>,
    /// Dispatch data still pending when the stream ends without a blank line
    pub dispatch_on_finish: bool,
    /// Largest joined data payload a single event may accumulate
    pub max_event_len: usize,
    /// What to do with an event whose data outgrows `max_event_len`
    pub overflow: OverflowPolicy,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            parse_json: true,
            done_marker: Some(DEFAULT_DONE_MARKER.to_string()),
            dispatch_on_finish: true,
            max_event_len: DEFAULT_MAX_CAPACITY,
            overflow: OverflowPolicy::Error,
        }
    }
}

impl SseOptions {
    pub fn with_done_marker(mut self, marker: Option<String>) -> Self {
        self.done_marker = marker;
        self
    }

    pub fn with_parse_json(mut self, parse_json: bool) -> Self {
        self.parse_json = parse_json;
        self
    }

    pub fn with_dispatch_on_finish(mut self, dispatch: bool) -> Self {
        self.dispatch_on_finish = dispatch;
        self
    }

    pub fn with_max_event_len(mut self, max: usize, overflow: OverflowPolicy) -> Self {
        self.max_event_len = max;
        self.overflow = overflow;
        self
    }
}

/// Incremental SSE parser fed one line at a time
#[derive(Debug)]
pub struct SseParser {
    options: SseOptions,
    data: String,
    data_lines: usize,
    event_type: Option<String>,
    last_event_id: String,
    retry: Option<u64>,
    started: bool,
    /// Ignoring the rest of an oversized event until the next blank line
    discarding: bool,
}

impl SseParser {
    pub fn new(options: SseOptions) -> Self {
        Self {
            options,
            data: String::new(),
            data_lines: 0,
            event_type: None,
            last_event_id: String::new(),
            retry: None,
            started: false,
            discarding: false,
        }
    }

    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    fn field(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        match name {
            b"data" => {
                let separator = usize::from(self.data_lines > 0);
                let len = self.data.len() + separator + value.len();
                if len > self.options.max_event_len {
                    return self.overflow(len);
                }
                if separator > 0 {
                    self.data.push('\n');
                }
                self.data.push_str(&String::from_utf8_lossy(value));
                self.data_lines += 1;
            }
            b"event" => {
                self.event_type = Some(String::from_utf8_lossy(value).into_owned());
            }
            b"id" => {
                if memchr::memchr(0, value).is_none() {
                    self.last_event_id = String::from_utf8_lossy(value).into_owned();
                } else {
                    tracing::debug!("ignoring event id containing NUL");
                }
            }
            b"retry" => {
                if !value.is_empty() && value.iter().all(u8::is_ascii_digit) {
                    self.retry = std::str::from_utf8(value).ok().and_then(|v| v.parse().ok());
                }
            }
            other => {
                tracing::trace!(field = %String::from_utf8_lossy(other), "ignoring unknown SSE field");
            }
        }
        Ok(())
    }

    fn overflow(&mut self, len: usize) -> Result<()> {
        let max = self.options.max_event_len;
        match self.options.overflow {
            OverflowPolicy::Error => Err(ParseError::BufferOverflow { len, max }),
            OverflowPolicy::Skip => {
                tracing::warn!(len, max, "dropping oversized SSE event");
                self.reset_pending();
                self.discarding = true;
                Ok(())
            }
        }
    }

    fn reset_pending(&mut self) {
        self.data.clear();
        self.data_lines = 0;
        self.event_type = None;
        self.retry = None;
    }

    fn dispatch(&mut self, out: &mut VecDeque<SseEvent>) -> ControlFlow<()> {
        let event_type = self.event_type.take();
        let retry = self.retry.take();
        if self.data_lines == 0 {
            return ControlFlow::Continue(());
        }

        let data = std::mem::take(&mut self.data);
        self.data_lines = 0;
        let event_type = event_type.filter(|t| !t.is_empty());

        if self.options.done_marker.as_deref() == Some(data.as_str()) {
            tracing::debug!("SSE stream reached done marker");
            return ControlFlow::Break(());
        }

        let data = if self.options.parse_json {
            match serde_json::from_str::<Value>(&data) {
                Ok(value) => EventData::Json(value),
                Err(_) => EventData::Text(data),
            }
        } else {
            EventData::Text(data)
        };

        out.push_back(SseEvent {
            data,
            event: event_type.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            id: self.last_event_id.clone(),
            retry,
        });
        ControlFlow::Continue(())
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new(SseOptions::default())
    }
}

impl FrameParser for SseParser {
    type Item = SseEvent;

    fn parse_frame(
        &mut self,
        frame: &[u8],
        out: &mut VecDeque<SseEvent>,
    ) -> Result<ControlFlow<()>> {
        let mut line = frame;
        if !self.started {
            self.started = true;
            line = line.strip_prefix(BOM).unwrap_or(line);
        }

        if self.discarding {
            if line.is_empty() {
                self.discarding = false;
                tracing::debug!("resynced after oversized SSE event");
            }
            return Ok(ControlFlow::Continue(()));
        }

        if line.is_empty() {
            return Ok(self.dispatch(out));
        }
        if line[0] == b':' {
            return Ok(ControlFlow::Continue(()));
        }

        let (name, value) = match memchr::memchr(b':', line) {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        self.field(name, value)?;

        Ok(ControlFlow::Continue(()))
    }

    fn finish(&mut self, out: &mut VecDeque<SseEvent>) -> Result<ControlFlow<()>> {
        if self.discarding {
            self.discarding = false;
            self.reset_pending();
            return Ok(ControlFlow::Continue(()));
        }
        if self.options.dispatch_on_finish {
            return Ok(self.dispatch(out));
        }
        if self.data_lines > 0 {
            tracing::debug!(lines = self.data_lines, "discarding undispatched SSE data");
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// SSE parser that emits only each event's data, decoded as `T`
///
/// Data that is not valid JSON for `T` is retried as a JSON string, so
/// `T = String` or `T = Value` receive plain-text payloads unchanged.
pub struct SseDataParser<T> {
    inner: SseParser,
    policy: ParseErrorPolicy,
    scratch: VecDeque<SseEvent>,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SseDataParser<T> {
    pub fn new(options: SseOptions, policy: ParseErrorPolicy) -> Self {
        Self {
            inner: SseParser::new(options.with_parse_json(false)),
            policy,
            scratch: VecDeque::new(),
            _item: PhantomData,
        }
    }

    fn convert(&mut self, out: &mut VecDeque<T>) -> Result<()> {
        while let Some(event) = self.scratch.pop_front() {
            let EventData::Text(text) = event.data else {
                continue;
            };
            match serde_json::from_str::<T>(&text) {
                Ok(item) => out.push_back(item),
                Err(err) => {
                    let parse_err = ParseError::json(err, text.as_bytes());
                    match serde_json::from_value::<T>(Value::String(text)) {
                        Ok(item) => out.push_back(item),
                        Err(_) => self.policy.handle(parse_err)?,
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T: DeserializeOwned> FrameParser for SseDataParser<T> {
    type Item = T;

    fn parse_frame(&mut self, frame: &[u8], out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        let flow = self.inner.parse_frame(frame, &mut self.scratch)?;
        self.convert(out)?;
        Ok(flow)
    }

    fn finish(&mut self, out: &mut VecDeque<T>) -> Result<ControlFlow<()>> {
        let flow = self.inner.finish(&mut self.scratch)?;
        self.convert(out)?;
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_all, FramePipeline, PipelineConfig};
    use serde_json::json;

    #[test]
    fn test_multiline_data_falls_back_to_text() {
        let events = parse_all(
            SseParser::default(),
            b"event: foo\ndata: {\"a\":1}\ndata: {\"b\":2}\n\n",
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "foo");
        assert_eq!(
            events[0].data,
            EventData::Text("{\"a\":1}\n{\"b\":2}".to_string())
        );
    }

    #[test]
    fn test_multiline_data_joined_into_json() {
        let events = parse_all(SseParser::default(), b"data: {\"a\":\ndata: 1}\n\n").unwrap();
        assert_eq!(events[0].data, EventData::Json(json!({"a": 1})));
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_event_id_is_sticky() {
        let input = b"id: 1\ndata: a\n\ndata: b\n\nid: 2\ndata: c\n\n";
        let ids: Vec<String> = parse_all(SseParser::default(), input)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["1", "1", "2"]);
    }

    #[test]
    fn test_id_with_nul_is_ignored() {
        let events = parse_all(SseParser::default(), b"id: 7\n\nid: a\0b\ndata: x\n\n").unwrap();
        assert_eq!(events[0].id, "7");
    }

    #[test]
    fn test_event_type_resets_after_dispatch() {
        let events = parse_all(SseParser::default(), b"event: ping\ndata: 1\n\ndata: 2\n\n").unwrap();
        assert_eq!(events[0].event, "ping");
        assert_eq!(events[1].event, "message");
    }

    #[test]
    fn test_comments_and_keepalives() {
        let events = parse_all(SseParser::default(), b": keep-alive\n\n\n\ndata: hi\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, EventData::Text("hi".to_string()));
    }

    #[test]
    fn test_only_one_leading_space_stripped() {
        let events = parse_all(SseParser::default(), b"data:  two spaces\ndata:none\n\n").unwrap();
        assert_eq!(events[0].data, EventData::Text(" two spaces\nnone".to_string()));
    }

    #[test]
    fn test_field_without_colon() {
        let events = parse_all(SseParser::default(), b"data\ndata\n\n").unwrap();
        assert_eq!(events[0].data, EventData::Text("\n".to_string()));
    }

    #[test]
    fn test_retry_parsed_not_acted_upon() {
        let events = parse_all(SseParser::default(), b"retry: 1500\ndata: x\n\nretry: soon\ndata: y\n\n").unwrap();
        assert_eq!(events[0].retry, Some(1500));
        assert_eq!(events[1].retry, None);
    }

    #[test]
    fn test_done_marker_stops_stream() {
        let events = parse_all(
            SseParser::default(),
            b"data: {\"n\":1}\n\ndata: [DONE]\n\ndata: {\"n\":2}\n\n",
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, EventData::Json(json!({"n": 1})));
    }

    #[test]
    fn test_custom_done_marker() {
        let options = SseOptions::default().with_done_marker(Some("END".to_string()));
        let events = parse_all(SseParser::new(options), b"data: [DONE]\n\ndata: END\n\ndata: z\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, EventData::Text("[DONE]".to_string()));
    }

    #[test]
    fn test_pending_data_dispatched_on_finish() {
        let events = parse_all(SseParser::default(), b"data: tail").unwrap();
        assert_eq!(events.len(), 1);

        let strict = SseOptions::default().with_dispatch_on_finish(false);
        assert!(parse_all(SseParser::new(strict), b"data: tail").unwrap().is_empty());
    }

    #[test]
    fn test_leading_bom_ignored() {
        let events = parse_all(SseParser::default(), b"\xEF\xBB\xBFdata: x\n\n").unwrap();
        assert_eq!(events[0].data, EventData::Text("x".to_string()));
    }

    #[test]
    fn test_empty_event_field_means_message() {
        let events = parse_all(SseParser::default(), b"event:\ndata: x\n\n").unwrap();
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_oversized_event_errors() {
        let options = SseOptions::default().with_max_event_len(16, OverflowPolicy::Error);
        let mut pipeline = FramePipeline::new(SseParser::new(options), &PipelineConfig::default());
        let mut out = VecDeque::new();

        pipeline.push(b"data: xxxxxxxx\n", &mut out).unwrap();
        let err = pipeline.push(b"data: xxxxxxxx\n", &mut out).unwrap_err();
        assert!(matches!(err, ParseError::BufferOverflow { len: 17, max: 16 }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_oversized_event_skipped_until_blank_line() {
        let options = SseOptions::default().with_max_event_len(16, OverflowPolicy::Skip);
        let input = b"data: 1\n\nevent: big\ndata: xxxxxxxx\ndata: xxxxxxxx\ndata: tail\nid: 5\n\ndata: 2\n\n";
        let events = parse_all(SseParser::new(options.clone()), input).unwrap();

        let data: Vec<_> = events.iter().map(|e| e.data.clone()).collect();
        assert_eq!(data, vec![EventData::Json(json!(1)), EventData::Json(json!(2))]);
        assert_eq!(events[1].event, "message");

        // An unterminated oversized event is never flushed
        let events = parse_all(SseParser::new(options), b"data: xxxxxxxx\ndata: xxxxxxxx\n").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_data_parser_typed_items() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Delta {
            n: u32,
        }

        let parser = SseDataParser::<Delta>::new(SseOptions::default(), ParseErrorPolicy::Skip);
        let items = parse_all(parser, b"data: {\"n\":1}\n\ndata: oops\n\ndata: {\"n\":2}\n\n").unwrap();
        assert_eq!(items, vec![Delta { n: 1 }, Delta { n: 2 }]);
    }

    #[test]
    fn test_data_parser_strict_fails() {
        let parser = SseDataParser::<u32>::new(SseOptions::default(), ParseErrorPolicy::Fail);
        let err = parse_all(parser, b"data: 1\n\ndata: nope\n\n").unwrap_err();
        assert!(matches!(err, ParseError::Json { .. }));
    }

    #[test]
    fn test_data_parser_text_fallback() {
        let parser = SseDataParser::<Value>::new(SseOptions::default(), ParseErrorPolicy::Fail);
        let items = parse_all(parser, b"data: plain words\n\ndata: [1,2]\n\n").unwrap();
        assert_eq!(items, vec![json!("plain words"), json!([1, 2])]);
    }
}
