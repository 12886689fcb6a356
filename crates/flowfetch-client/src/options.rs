use std::time::Duration;

use bytes::Bytes;
use flowfetch_parse::{
    JsonParserConfig, OverflowPolicy, ParseErrorPolicy, PipelineConfig, SseOptions,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{FetchError, Result, TransportError};
use crate::retry::{Backoff, RetryCandidate, RetryOn, RetryPolicy};
use crate::transport::Request;

/// Wire format of a streamed body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// `text/event-stream`
    Sse,
    /// One JSON value per line
    NdJson,
    /// Concatenated JSON objects or arrays
    Json,
}

impl StreamFormat {
    fn accept(self) -> &'static str {
        match self {
            Self::Sse => "text/event-stream",
            Self::NdJson => "application/x-ndjson",
            Self::Json => "application/json",
        }
    }
}

/// Per-request options; start from [`FlowClient::options`](crate::FlowClient::options)
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub backoff: Backoff,
    pub retry_on: RetryOn,
    pub respect_retry_after: bool,
    /// Streaming format; `None` requests a plain whole-body response
    pub stream: Option<StreamFormat>,
    pub strict_json: bool,
    pub on_buffer_overflow: OverflowPolicy,
    pub max_buffer: usize,
    pub initial_buffer: usize,
    pub done_marker: Option<String>,
    /// External cancellation; cancelling it aborts the request and any body read
    pub signal: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RequestOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            retries: config.retries,
            timeout: config.timeout(),
            backoff: config.backoff(),
            retry_on: RetryOn::Default,
            respect_retry_after: config.respect_retry_after,
            stream: None,
            strict_json: config.strict_json,
            on_buffer_overflow: config.on_buffer_overflow,
            max_buffer: config.max_buffer,
            initial_buffer: config.initial_buffer,
            done_marker: config.done_marker.clone(),
            signal: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the request body and set `Content-Type: application/json`
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| {
            FetchError::Transport(TransportError::InvalidRequest(format!("unserializable body: {e}")))
        })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(body.into());
        Ok(self)
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Backoff::custom(f);
        self
    }

    pub fn with_retry_on<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryCandidate<'_>) -> bool + Send + Sync + 'static,
    {
        self.retry_on = RetryOn::custom(f);
        self
    }

    pub fn with_respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn with_stream(mut self, format: StreamFormat) -> Self {
        self.stream = Some(format);
        self
    }

    pub fn with_strict_json(mut self, strict: bool) -> Self {
        self.strict_json = strict;
        self
    }

    pub fn with_buffer_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.on_buffer_overflow = policy;
        self
    }

    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    pub fn with_done_marker(mut self, marker: Option<String>) -> Self {
        self.done_marker = marker;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: self.backoff.clone(),
            retry_on: self.retry_on.clone(),
            respect_retry_after: self.respect_retry_after,
        }
    }

    pub(crate) fn build_request(&self, url: &str) -> Result<Request> {
        let mut request = Request::new(self.method.clone(), url)?;
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        if let Some(format) = self.stream {
            if !request.headers.contains_key(ACCEPT) {
                request
                    .headers
                    .insert(ACCEPT, HeaderValue::from_static(format.accept()));
            }
        }
        Ok(request)
    }

    pub(crate) fn parse_settings(&self) -> ParseSettings {
        ParseSettings {
            pipeline: PipelineConfig {
                initial_capacity: self.initial_buffer,
                max_frame_len: self.max_buffer,
                overflow: self.on_buffer_overflow,
            },
            errors: ParseErrorPolicy::from_strict(self.strict_json),
            done_marker: self.done_marker.clone(),
            format: self.stream,
        }
    }
}

/// Parser configuration carried from the request into its response
#[derive(Debug, Clone)]
pub(crate) struct ParseSettings {
    pub pipeline: PipelineConfig,
    pub errors: ParseErrorPolicy,
    pub done_marker: Option<String>,
    pub format: Option<StreamFormat>,
}

impl ParseSettings {
    pub fn sse(&self) -> SseOptions {
        SseOptions::default()
            .with_done_marker(self.done_marker.clone())
            .with_max_event_len(self.pipeline.max_frame_len, self.pipeline.overflow)
    }

    pub fn json(&self) -> JsonParserConfig {
        JsonParserConfig {
            initial_capacity: self.pipeline.initial_capacity,
            max_value_len: self.pipeline.max_frame_len,
            overflow: self.pipeline.overflow,
            errors: self.errors,
        }
    }
}
