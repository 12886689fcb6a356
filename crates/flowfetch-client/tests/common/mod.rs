#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use flowfetch_client::{
    BodyStream, ClientConfig, FlowClient, Request, Transport, TransportError, TransportResponse,
};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the scripted server does for one attempt
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with a status, headers and a complete body
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Bytes>,
    },
    /// Respond, send these chunks, then never finish the body
    Stall { chunks: Vec<Bytes> },
    /// Never produce response headers
    Hang,
    /// Fail at the transport level
    Fail(&'static str),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn body(parts: &[&'static str]) -> Self {
        Self::Respond {
            status: 200,
            headers: Vec::new(),
            chunks: to_chunks(parts),
        }
    }

    pub fn stall(parts: &[&'static str]) -> Self {
        Self::Stall {
            chunks: to_chunks(parts),
        }
    }
}

/// In-memory transport replaying a script of attempt outcomes
///
/// When the script runs out, the last step repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicU32,
    sent_at: Mutex<Vec<Instant>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Virtual time of each send
    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent_at.lock().unwrap().clone()
    }

    /// Cancellation token handed to each attempt
    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            *last = Some(step);
        }
        last.clone().unwrap_or(Step::Hang)
    }
}

fn to_chunks(parts: &[&'static str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
}

fn body_of(chunks: Vec<Bytes>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
    futures::stream::iter(chunks.into_iter().map(Ok))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent_at.lock().unwrap().push(Instant::now());
        self.tokens.lock().unwrap().push(cancel.clone());

        let (status, headers, body): (u16, Vec<(&str, &str)>, BodyStream) = match self.next_step() {
            Step::Respond {
                status,
                headers,
                chunks,
            } => (status, headers, Box::pin(body_of(chunks))),
            Step::Stall { chunks } => (
                200,
                Vec::new(),
                Box::pin(body_of(chunks).chain(futures::stream::pending())),
            ),
            Step::Hang => std::future::pending().await,
            Step::Fail(message) => return Err(TransportError::Other(message.to_string())),
        };

        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        Ok(TransportResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            url: request.url.clone(),
            body,
        })
    }
}

pub fn client(transport: Arc<ScriptedTransport>) -> FlowClient {
    FlowClient::with_transport(transport, ClientConfig::default())
}
