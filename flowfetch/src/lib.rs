//! # Flowfetch
//!
//! HTTP fetching with retries and incremental body parsing:
//! - **Retry/backoff** with jitter, `Retry-After` and custom predicates
//! - **Timeouts and cancellation** covering headers and body reads alike
//! - **Streaming parsers** for SSE, NDJSON and concatenated JSON values
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowfetch::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = FlowClient::new()?;
//!     let options = client.options().with_stream(StreamFormat::Sse);
//!     let mut response = client.fetch("https://example.com/events", options).await?;
//!
//!     let mut values = response.values::<serde_json::Value>()?;
//!     while let Some(value) = values.next().await {
//!         println!("{}", value?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Crates
//!
//! - **flowfetch-parse**: ring buffer, frame splitter and the SSE/JSON/NDJSON parsers
//! - **flowfetch-client**: transport, retry controller and the streaming response

pub use flowfetch_client as client;
pub use flowfetch_parse as parse;

pub use flowfetch_client::{
    ClientConfig, FetchError, FlowClient, RequestOptions, StreamFormat, StreamingResponse,
};
pub use flowfetch_parse::{
    parse_all, FramePipeline, FrameParser, JsonObjectParser, NdJsonParser, SseEvent, SseParser,
};

/// Convenient prelude with commonly used types
pub mod prelude {
    pub use crate::client::{
        CancellationToken, ClientConfig, FetchError, FlowClient, RequestOptions, StreamFormat,
        StreamingResponse,
    };
    pub use crate::parse::{EventData, OverflowPolicy, ParseErrorPolicy, SseEvent};
    pub use anyhow::Result;
}
