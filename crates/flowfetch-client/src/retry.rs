//! Attempt loop with backoff, per-attempt timeout and cancellation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{FetchError, Result, TransportError};
use crate::signal::{race, AttemptScope};
use crate::transport::{Request, Transport, TransportResponse};

/// Computes the delay before retry number `attempt` (starting at 1)
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Decides whether a failed attempt is worth repeating
pub type RetryPredicate = Arc<dyn Fn(&RetryCandidate<'_>) -> bool + Send + Sync>;

/// Outcome of one attempt as seen by a retry predicate
///
/// Only status and headers are exposed; bodies are never read to decide.
#[derive(Debug)]
pub enum RetryCandidate<'a> {
    Response {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    Error(&'a TransportError),
}

#[derive(Clone)]
pub enum Backoff {
    /// `min(max, initial * base^(attempt-1))` scaled by a random factor in `[1 - jitter, 1]`
    Exponential {
        initial: Duration,
        max: Duration,
        base: f64,
        jitter: f64,
    },
    Custom(BackoffFn),
}

impl Backoff {
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential {
            initial,
            max,
            base: 2.0,
            jitter: 0.2,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                initial,
                max,
                base,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let raw = initial.as_secs_f64() * base.powi(exponent);
                let capped = raw.min(max.as_secs_f64());
                let factor = 1.0 - jitter.clamp(0.0, 1.0) * fastrand::f64();
                Duration::try_from_secs_f64(capped * factor).unwrap_or(*max)
            }
            Self::Custom(f) => f(attempt),
        }
    }

    /// Upper bound for server-requested delays, when the strategy has one
    pub fn max_delay(&self) -> Option<Duration> {
        match self {
            Self::Exponential { max, .. } => Some(*max),
            Self::Custom(_) => None,
        }
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exponential {
                initial,
                max,
                base,
                jitter,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("max", max)
                .field("base", base)
                .field("jitter", jitter)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// 5xx plus the transient client errors 408 and 429
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[derive(Clone, Default)]
pub enum RetryOn {
    /// Retryable statuses per [`is_retryable_status`] and every transport error
    #[default]
    Default,
    /// Exactly these statuses, plus every transport error
    Statuses(Vec<u16>),
    Custom(RetryPredicate),
}

impl RetryOn {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RetryCandidate<'_>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn should_retry(&self, candidate: &RetryCandidate<'_>) -> bool {
        match (self, candidate) {
            (Self::Custom(f), candidate) => f(candidate),
            (_, RetryCandidate::Error(_)) => true,
            (Self::Default, RetryCandidate::Response { status, .. }) => is_retryable_status(*status),
            (Self::Statuses(codes), RetryCandidate::Response { status, .. }) => {
                codes.contains(&status.as_u16())
            }
        }
    }
}

impl std::fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Statuses(codes) => f.debug_tuple("Statuses").field(codes).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first; `retries = 2` means at most 3 sends
    pub retries: u32,
    pub backoff: Backoff,
    pub retry_on: RetryOn,
    /// Wait for a delta-seconds `Retry-After` instead of the computed backoff
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Backoff::exponential(Duration::from_secs(1), Duration::from_secs(30)),
            retry_on: RetryOn::Default,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        if !self.respect_retry_after {
            return None;
        }
        let delay = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)?;
        Some(match self.backoff.max_delay() {
            Some(max) => delay.min(max),
            None => delay,
        })
    }
}

/// Delta-seconds form of `Retry-After`; HTTP dates are not supported
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// The attempt that ended the loop successfully
pub(crate) struct Attempted {
    pub response: TransportResponse,
    pub scope: AttemptScope,
    /// Cancels the attempt's transport token once the body is released
    pub guard: DropGuard,
    pub attempts: u32,
}

pub(crate) struct RetryController<'a> {
    transport: &'a dyn Transport,
    policy: &'a RetryPolicy,
    timeout: Option<Duration>,
    signal: CancellationToken,
}

impl<'a> RetryController<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        policy: &'a RetryPolicy,
        timeout: Option<Duration>,
        signal: CancellationToken,
    ) -> Self {
        Self {
            transport,
            policy,
            timeout,
            signal,
        }
    }

    pub(crate) async fn run(&self, request: &Request) -> Result<Attempted> {
        let max_attempts = self.policy.retries.saturating_add(1);
        let mut attempt: u32 = 0;
        let mut delay: Option<Duration> = None;

        loop {
            attempt += 1;

            if let Some(wait) = delay.take() {
                tracing::debug!(attempt, delay_ms = wait.as_millis() as u64, "waiting before retry");
                race(&self.signal, None, tokio::time::sleep(wait))
                    .await
                    .map_err(|_| FetchError::Cancelled)?;
            }
            if self.signal.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let token = self.signal.child_token();
            let guard = token.clone().drop_guard();
            let scope = AttemptScope::start(self.signal.clone(), self.timeout);

            tracing::debug!(attempt, method = %request.method, url = %request.url, "sending request");

            let outcome = scope.run(self.transport.send(request, token)).await;
            let mut retry_after = None;
            let failure = match outcome {
                Err(FetchError::Cancelled) => {
                    tracing::debug!(attempt, "request cancelled");
                    return Err(FetchError::Cancelled);
                }
                // Per-attempt timeouts are always retried while attempts remain.
                Err(timeout) => timeout,
                Ok(Err(err)) => {
                    if !self.policy.retry_on.should_retry(&RetryCandidate::Error(&err)) {
                        return Err(err.into());
                    }
                    err.into()
                }
                Ok(Ok(response)) => {
                    let candidate = RetryCandidate::Response {
                        status: response.status,
                        headers: &response.headers,
                    };
                    if !self.policy.retry_on.should_retry(&candidate) {
                        tracing::debug!(attempt, status = %response.status, "request completed");
                        return Ok(Attempted {
                            response,
                            scope,
                            guard,
                            attempts: attempt,
                        });
                    }

                    retry_after = self.policy.retry_after(&response.headers);
                    let TransportResponse { status, headers, .. } = response;
                    FetchError::Status { status, headers }
                }
            };
            // Releases the discarded attempt's body before anything else happens.
            drop(guard);

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %failure, "giving up");
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            tracing::warn!(
                attempt,
                remaining = max_attempts - attempt,
                error = %failure,
                "attempt failed, retrying"
            );
            delay = Some(retry_after.unwrap_or_else(|| self.policy.backoff.delay(attempt)));
        }
    }
}
