use std::future::Future;
use std::time::{Duration, SystemTime};

use b2_config::groups::client::ConfigValueGroup as ClientConfig;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{Jitter, RetryDecision, RetryPolicy as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Decides whether a failed attempt is worth repeating.
pub type RetryClassifier = fn(&TransportError) -> bool;

/// An error of one attempt. Only transport failures are ever retried.
pub trait RetryableError: std::fmt::Display {
    fn as_transport(&self) -> Option<&TransportError>;
}

impl RetryableError for TransportError {
    fn as_transport(&self) -> Option<&TransportError> {
        Some(self)
    }
}

/// Retry behaviour shared by the upload and download engines.
///
/// Delays grow as `base_delay * 2^attempt` with jitter and never exceed `max_delay`. An operation
/// is attempted at most `max_attempts` times in total.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    classifier: RetryClassifier,
}

/// How a retried operation ended if it did not succeed.
#[derive(Debug)]
pub enum RetryFailure<E = TransportError> {
    /// Every attempt failed transiently; holds the last error.
    Exhausted { attempts: usize, source: E },
    /// An attempt failed in a way that retrying won't fix.
    Fatal { attempts: usize, source: E },
    Cancelled,
}

impl<E> RetryFailure<E> {
    pub fn map_source<F>(self, f: impl FnOnce(E) -> F) -> RetryFailure<F> {
        match self {
            RetryFailure::Exhausted { attempts, source } => RetryFailure::Exhausted {
                attempts,
                source: f(source),
            },
            RetryFailure::Fatal { attempts, source } => RetryFailure::Fatal {
                attempts,
                source: f(source),
            },
            RetryFailure::Cancelled => RetryFailure::Cancelled,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            classifier: TransportError::is_transient,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.retry_max_attempts, config.retry_base_delay, config.retry_max_delay)
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn is_transient(&self, e: &TransportError) -> bool {
        (self.classifier)(e)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .retry_bounds(self.base_delay, self.max_delay)
            .jitter(Jitter::Bounded)
            .base(2)
            .build_with_max_retries((self.max_attempts - 1) as u32)
    }

    /// How long to wait after `attempt` failed attempts, or `None` once the budget is spent.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        let now = SystemTime::now();
        match self.backoff().should_retry(now, (attempt - 1) as u32) {
            RetryDecision::Retry { execute_after } => Some(execute_after.duration_since(now).unwrap_or_default()),
            RetryDecision::DoNotRetry => None,
        }
    }

    /// Sleeps before the next attempt. Returns false if the budget is spent or `cancel` fired.
    pub async fn wait_before_retry(&self, attempt: usize, cancel: &CancellationToken) -> bool {
        let Some(delay) = self.delay_after(attempt) else {
            return false;
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Runs `attempt_fn` until it succeeds, fails fatally, runs out of attempts or is cancelled.
    ///
    /// `attempt_fn` receives the zero-based attempt number so callers can discard per-attempt state
    /// such as an upload URL after a failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, RetryFailure<E>>
    where
        E: RetryableError,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryFailure::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                r = attempt_fn(attempt) => r,
            };
            attempt += 1;

            let e = match result {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            if !e.as_transport().is_some_and(|t| self.is_transient(t)) {
                debug!(op_name, attempt, "fatal error: {e}");
                return Err(RetryFailure::Fatal {
                    attempts: attempt,
                    source: e,
                });
            }

            if attempt >= self.max_attempts {
                warn!(op_name, attempt, "giving up: {e}");
                return Err(RetryFailure::Exhausted {
                    attempts: attempt,
                    source: e,
                });
            }

            warn!(op_name, attempt, max_attempts = self.max_attempts, "retrying after transient error: {e}");
            if !self.wait_before_retry(attempt, cancel).await {
                if cancel.is_cancelled() {
                    return Err(RetryFailure::Cancelled);
                }
                return Err(RetryFailure::Exhausted {
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}
