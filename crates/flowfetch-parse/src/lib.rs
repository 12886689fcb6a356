//! Incremental parsers for streamed HTTP bodies.
//!
//! Bytes are pushed in as they arrive and typed items come out as soon as a
//! complete frame is available:
//!
//! ```text
//! chunks -> RingBuffer -> FrameSplitter -> FrameParser -> items
//! ```
//!
//! Nothing here depends on an async runtime; the client crate drives a
//! [`FramePipeline`] from its response stream.

pub mod error;
pub mod json;
pub mod ndjson;
pub mod parser;
pub mod pipeline;
pub mod ring;
pub mod split;
pub mod sse;

pub use error::{ParseError, Result};
pub use json::{JsonObjectParser, JsonParserConfig};
pub use ndjson::NdJsonParser;
pub use parser::{from_fn, FnParser, FrameParser, Framing, ParseErrorPolicy};
pub use pipeline::{parse_all, FramePipeline, PipelineConfig};
pub use ring::{RingBuffer, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY};
pub use split::{FrameSplitter, OverflowPolicy, SplitMode, SplitterConfig};
pub use sse::{EventData, SseDataParser, SseEvent, SseOptions, SseParser, DEFAULT_DONE_MARKER};
