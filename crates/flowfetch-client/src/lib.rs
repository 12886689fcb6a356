//! Retrying HTTP client whose response bodies can be consumed as typed streams.
//!
//! ```rust,no_run
//! use flowfetch_client::{FlowClient, StreamFormat};
//! use futures::StreamExt;
//!
//! # async fn demo() -> flowfetch_client::Result<()> {
//! let client = FlowClient::new()?;
//! let options = client.options().with_stream(StreamFormat::Sse).with_retries(2);
//! let mut response = client.fetch("https://example.com/events", options).await?;
//!
//! let mut values = response.values::<serde_json::Value>()?;
//! while let Some(value) = values.next().await {
//!     println!("{}", value?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod options;
pub mod response;
pub mod retry;
pub mod signal;
pub mod transport;

pub use client::FlowClient;
pub use config::ClientConfig;
pub use decode::{ContentDecoder, FlateDecoder, Passthrough};
pub use error::{FetchError, Result, TransportError};
pub use options::{RequestOptions, StreamFormat};
pub use response::{ParsedStream, StreamingResponse};
pub use retry::{
    is_retryable_status, parse_retry_after, Backoff, RetryCandidate, RetryOn, RetryPolicy,
};
pub use signal::{race, Interrupt};
pub use transport::{BodyStream, ReqwestTransport, Request, Transport, TransportResponse};

pub use tokio_util::sync::CancellationToken;
