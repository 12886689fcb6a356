use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};

/// Which side of a [`race`] won against the future
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Run `future` until it completes, `signal` fires or `deadline` passes
///
/// The first to resolve wins and the others are dropped. When several are
/// ready at once, cancellation beats the deadline and both beat the future.
pub async fn race<F>(
    signal: &CancellationToken,
    deadline: Option<Instant>,
    future: F,
) -> std::result::Result<F::Output, Interrupt>
where
    F: Future,
{
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(Interrupt::Cancelled),
        _ = expired => Err(Interrupt::TimedOut),
        output = future => Ok(output),
    }
}

/// User signal plus the deadline of one attempt
///
/// Lives on with the returned response so body reads stay under the same
/// timeout and cancellation as the request that produced them.
#[derive(Debug, Clone)]
pub(crate) struct AttemptScope {
    signal: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl AttemptScope {
    pub(crate) fn start(signal: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            signal,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
        }
    }

    pub(crate) async fn run<F: Future>(&self, future: F) -> Result<F::Output> {
        race(&self.signal, self.deadline, future)
            .await
            .map_err(|interrupt| match interrupt {
                Interrupt::Cancelled => FetchError::Cancelled,
                Interrupt::TimedOut => FetchError::Timeout {
                    after: self.timeout.unwrap_or_default(),
                },
            })
    }
}
