use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use futures::StreamExt;

use crate::error::{Result, TransportError};
use crate::transport::BodyStream;

/// Turns an encoded body into a decoded one before parsing
pub trait ContentDecoder: Send + Sync {
    /// `encoding` is the raw `Content-Encoding` header value
    fn decode(&self, encoding: &str, body: BodyStream) -> Result<BodyStream>;
}

/// Leaves every body untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ContentDecoder for Passthrough {
    fn decode(&self, _encoding: &str, body: BodyStream) -> Result<BodyStream> {
        Ok(body)
    }
}

/// Streams `gzip` and `deflate` bodies through flate2 chunk by chunk
#[derive(Debug, Default, Clone, Copy)]
pub struct FlateDecoder;

impl ContentDecoder for FlateDecoder {
    fn decode(&self, encoding: &str, body: BodyStream) -> Result<BodyStream> {
        let mut body = body;
        // Codings are listed in the order they were applied.
        for coding in encoding.rsplit(',') {
            let coding = coding.trim().to_ascii_lowercase();
            body = match coding.as_str() {
                "" | "identity" => body,
                "gzip" | "x-gzip" => inflate(body, GzDecoder::new(Vec::new())),
                "deflate" => inflate(body, ZlibDecoder::new(Vec::new())),
                other => {
                    tracing::warn!(encoding = other, "unsupported content encoding, passing body through");
                    return Ok(body);
                }
            };
        }
        Ok(body)
    }
}

/// flate2 write-side decoder collecting output into a `Vec`
trait WriteDecoder: Write + Send + 'static {
    fn output(&mut self) -> &mut Vec<u8>;
    fn finish_output(self) -> std::io::Result<Vec<u8>>;
}

impl WriteDecoder for GzDecoder<Vec<u8>> {
    fn output(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }

    fn finish_output(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl WriteDecoder for ZlibDecoder<Vec<u8>> {
    fn output(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }

    fn finish_output(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

fn inflate<D: WriteDecoder>(mut body: BodyStream, mut decoder: D) -> BodyStream {
    Box::pin(async_stream::stream! {
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if let Err(e) = decoder.write_all(&chunk).and_then(|()| decoder.flush()) {
                yield Err(TransportError::Decompress(e));
                return;
            }
            let out = std::mem::take(decoder.output());
            if !out.is_empty() {
                yield Ok(Bytes::from(out));
            }
        }

        match decoder.finish_output() {
            Ok(rest) if !rest.is_empty() => yield Ok(Bytes::from(rest)),
            Ok(_) => {}
            Err(e) => yield Err(TransportError::Decompress(e)),
        }
    })
}
