use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Pull-based source of body chunks
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Everything a transport needs to issue one attempt
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidRequest(format!("{url}: {e}")))?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        })
    }
}

/// Status line and headers of one attempt plus its unread body
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Sends one request attempt
///
/// `cancel` fires when the attempt is abandoned: the caller gave up, the
/// attempt was discarded for a retry, or the returned body was dropped.
/// Implementations should stop producing body chunks once it fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by `reqwest`
///
/// Built without reqwest's own decompression so `Content-Encoding` handling
/// stays with the client's [`ContentDecoder`](crate::ContentDecoder).
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http_client })
    }

    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let body = response
            .bytes_stream()
            .map_err(TransportError::from)
            .take_until(cancel.cancelled_owned());

        Ok(TransportResponse {
            status,
            headers,
            url,
            body: Box::pin(body),
        })
    }
}
