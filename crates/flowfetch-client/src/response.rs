use std::collections::VecDeque;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use flowfetch_parse::{
    FramePipeline, FrameParser, JsonObjectParser, NdJsonParser, ParseError, SseDataParser,
    SseEvent, SseParser,
};
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_ENCODING};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::DropGuard;

use crate::decode::ContentDecoder;
use crate::error::{FetchError, Result};
use crate::options::{ParseSettings, StreamFormat};
use crate::retry::Attempted;
use crate::signal::AttemptScope;
use crate::transport::{BodyStream, TransportResponse};

/// Lazily parsed body items
pub type ParsedStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Body plus everything needed to keep reading it under the attempt's limits
struct Body {
    stream: BodyStream,
    scope: AttemptScope,
    guard: DropGuard,
}

/// Response of the final attempt
///
/// Status and headers are available immediately. The body can be consumed
/// exactly once, either whole ([`bytes`](Self::bytes), [`text`](Self::text),
/// [`json`](Self::json)) or as a stream of parsed values; any later attempt
/// to read it fails with [`FetchError::BodyConsumed`].
pub struct StreamingResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    attempts: u32,
    settings: ParseSettings,
    body: Option<Body>,
}

impl StreamingResponse {
    /// Wrap the winning attempt, decoding its body per `Content-Encoding`
    pub(crate) fn from_attempt(
        attempted: Attempted,
        decoder: &dyn ContentDecoder,
        settings: ParseSettings,
    ) -> Result<Self> {
        let Attempted {
            response,
            scope,
            guard,
            attempts,
        } = attempted;
        let TransportResponse {
            status,
            headers,
            url,
            body,
        } = response;

        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let stream = match encoding {
            Some(encoding) => decoder.decode(&encoding, body)?,
            None => body,
        };

        Ok(Self {
            status,
            headers,
            url,
            attempts,
            settings,
            body: Some(Body {
                stream,
                scope,
                guard,
            }),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// True for 2xx statuses
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of attempts it took to get this response
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once a whole-body accessor or stream has claimed the body
    pub fn is_consumed(&self) -> bool {
        self.body.is_none()
    }

    /// Turn a non-2xx response into [`FetchError::Status`], releasing the body
    pub fn error_for_status(self) -> Result<Self> {
        if self.ok() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                headers: self.headers,
            })
        }
    }

    fn take_body(&mut self) -> Result<Body> {
        self.body.take().ok_or(FetchError::BodyConsumed)
    }

    pub async fn bytes(&mut self) -> Result<Bytes> {
        let Body {
            mut stream,
            scope,
            guard: _guard,
        } = self.take_body()?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = scope.run(stream.next()).await? {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FetchError::Parse(ParseError::Utf8(e.utf8_error())))
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ParseError::json(e, &bytes).into())
    }

    /// Stream the body through any [`FrameParser`]
    pub fn parse_with<P>(&mut self, parser: P) -> Result<ParsedStream<P::Item>>
    where
        P: FrameParser + Send + 'static,
        P::Item: Send + 'static,
    {
        let body = self.take_body()?;
        let pipeline = FramePipeline::new(parser, &self.settings.pipeline);
        Ok(drive(body, pipeline))
    }

    /// Full SSE events; JSON data is decoded when valid, kept as text otherwise
    pub fn sse_events(&mut self) -> Result<ParsedStream<SseEvent>> {
        let parser = SseParser::new(self.settings.sse());
        self.parse_with(parser)
    }

    /// Only the `data` of each SSE event, deserialized as `T`
    pub fn sse_data<T>(&mut self) -> Result<ParsedStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let parser = SseDataParser::new(self.settings.sse(), self.settings.errors);
        self.parse_with(parser)
    }

    pub fn ndjson<T>(&mut self) -> Result<ParsedStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let parser = NdJsonParser::new(self.settings.errors)
            .with_done_marker(self.settings.done_marker.clone());
        self.parse_with(parser)
    }

    /// Concatenated top-level JSON objects or arrays
    pub fn json_values<T>(&mut self) -> Result<ParsedStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let parser = JsonObjectParser::new(self.settings.json());
        self.parse_with(parser)
    }

    /// Stream values in the format chosen with
    /// [`RequestOptions::with_stream`](crate::RequestOptions::with_stream),
    /// treating a non-streaming request as concatenated JSON
    pub fn values<T>(&mut self) -> Result<ParsedStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.settings.format {
            Some(StreamFormat::Sse) => self.sse_data(),
            Some(StreamFormat::NdJson) => self.ndjson(),
            Some(StreamFormat::Json) | None => self.json_values(),
        }
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("attempts", &self.attempts)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Pull chunks on demand, yielding every parsed item before the next read
fn drive<P>(body: Body, mut pipeline: FramePipeline<P>) -> ParsedStream<P::Item>
where
    P: FrameParser + Send + 'static,
    P::Item: Send + 'static,
{
    Box::pin(async_stream::stream! {
        let Body { mut stream, scope, guard } = body;
        // Dropped with this stream, releasing the transport body on every exit path.
        let _guard = guard;
        let mut ready = VecDeque::new();

        loop {
            while let Some(item) = ready.pop_front() {
                yield Ok(item);
            }
            if pipeline.is_done() {
                break;
            }

            let result = match scope.run(stream.next()).await {
                Err(err) => Err(err),
                Ok(Some(Err(err))) => Err(FetchError::from(err)),
                Ok(Some(Ok(chunk))) => pipeline.push(&chunk, &mut ready).map_err(FetchError::from),
                Ok(None) => pipeline.finish(&mut ready).map_err(FetchError::from),
            };

            // Items parsed before a failure are still delivered.
            while let Some(item) = ready.pop_front() {
                yield Ok(item);
            }
            if let Err(err) = result {
                tracing::debug!(error = %err, "body stream ended with error");
                yield Err(err);
                break;
            }
        }
    })
}
