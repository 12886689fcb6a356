use std::sync::Arc;

use crate::config::ClientConfig;
use crate::decode::{ContentDecoder, FlateDecoder};
use crate::error::Result;
use crate::options::RequestOptions;
use crate::response::StreamingResponse;
use crate::retry::RetryController;
use crate::transport::{ReqwestTransport, Transport};

/// HTTP client with retries, timeouts and typed streaming bodies
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct FlowClient {
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn ContentDecoder>,
    config: ClientConfig,
}

impl FlowClient {
    /// Client with default configuration over `reqwest`
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Client over a custom transport
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            decoder: Arc::new(FlateDecoder),
            config,
        }
    }

    /// Replace the `Content-Encoding` handler (defaults to [`FlateDecoder`])
    pub fn with_decoder(mut self, decoder: Arc<dyn ContentDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fresh request options seeded from this client's configuration
    pub fn options(&self) -> RequestOptions {
        RequestOptions::from_config(&self.config)
    }

    pub async fn get(&self, url: &str) -> Result<StreamingResponse> {
        self.fetch(url, self.options()).await
    }

    /// Send a request, retrying per `options` until a final response arrives
    ///
    /// Non-2xx statuses that the retry predicate rejects are returned as
    /// ordinary responses; see [`StreamingResponse::error_for_status`].
    pub async fn fetch(&self, url: &str, options: RequestOptions) -> Result<StreamingResponse> {
        let request = options.build_request(url)?;
        let policy = options.retry_policy();
        let signal = options.signal.clone().unwrap_or_default();

        let controller =
            RetryController::new(self.transport.as_ref(), &policy, options.timeout, signal);
        let attempted = controller.run(&request).await?;

        StreamingResponse::from_attempt(attempted, self.decoder.as_ref(), options.parse_settings())
    }
}

impl std::fmt::Debug for FlowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
