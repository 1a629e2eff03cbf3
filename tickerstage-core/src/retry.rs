//! Bounded retry with a fixed backoff schedule.
//!
//! The schedule is a list rather than a formula: attempt `k` (1-indexed) that
//! fails with a retryable error waits `delays[min(k - 1, len - 1)]` before
//! attempt `k + 1`. Errors whose kind is not in [`RetrySpec::retry_on`] propagate
//! immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of an error message included in retry logs.
const ERROR_PREVIEW_LEN: usize = 200;

/// Coarse classification of a failure, used to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    RateLimited,
    ServerError,
    EmptyResponse,
    NotFound,
    ClientError,
    Malformed,
    Config,
    Io,
}

/// Errors that can be classified into an [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Retry policy for one fallible operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySpec {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait before the next attempt, in milliseconds. The last entry repeats.
    pub delays_ms: Vec<u64>,
    /// Error kinds worth retrying.
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delays_ms: vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000],
            retry_on: vec![
                ErrorKind::Timeout,
                ErrorKind::Connection,
                ErrorKind::RateLimited,
                ErrorKind::ServerError,
                ErrorKind::EmptyResponse,
            ],
        }
    }
}

impl RetrySpec {
    /// A spec that retries the default transient kinds with no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delays_ms: vec![0],
            ..Self::default()
        }
    }

    /// Attempts actually made, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays_ms.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.delays_ms.len() - 1);
        Duration::from_millis(self.delays_ms[idx])
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }
}

/// Failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with an error that is not retried.
    #[error("{error}")]
    NonRetryable { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// The error from the final attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable { error, .. } => error,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable { error, .. } => error,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }
}

/// Executes operations under a [`RetrySpec`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    spec: RetrySpec,
}

impl RetryPolicy {
    pub fn new(spec: RetrySpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &RetrySpec {
        &self.spec
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `what` names the operation in logs.
    pub fn execute<T, E, F>(&self, what: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        self.execute_with(what, op, |_, _| {})
    }

    /// Like [`execute`](Self::execute), calling `on_retry(next_attempt, delay)`
    /// before each backoff sleep.
    pub fn execute_with<T, E, F, H>(
        &self,
        what: &str,
        mut op: F,
        mut on_retry: H,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Result<T, E>,
        H: FnMut(u32, Duration),
    {
        let max_attempts = self.spec.attempts();
        let mut attempt = 1;

        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.spec.is_retryable(err.kind()) {
                tracing::debug!(what, attempt, kind = ?err.kind(), "non-retryable failure");
                return Err(RetryError::NonRetryable {
                    attempt,
                    error: err,
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    what,
                    attempts = attempt,
                    error = %preview(&err),
                    "retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.spec.delay_for(attempt);
            tracing::warn!(
                what,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %preview(&err),
                "attempt failed, retrying"
            );
            on_retry(attempt + 1, delay);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}

fn preview(err: &impl fmt::Display) -> String {
    let text = err.to_string();
    if text.chars().count() > ERROR_PREVIEW_LEN {
        let cut: String = text.chars().take(ERROR_PREVIEW_LEN).collect();
        format!("{cut}...")
    } else {
        text
    }
}
