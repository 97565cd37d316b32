//! Resilient call execution with classified retries
//!
//! Every outbound network call in Recast (credential refresh, platform
//! publish, feed fetch, content generation) goes through [`execute`]. Only
//! errors the caller's classifier marks retryable are retried; everything
//! else propagates on first sight. Backoff is exponential with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Backoff parameters for one call site.
///
/// The delay before retry attempt `k` (0-based) is
/// `base_delay * 2^k + uniform_jitter(0, max_jitter)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Additional attempts after the first; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_retries: 3,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
            ..Self::default()
        }
    }

    /// Deterministic part of the backoff before retry `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    fn jitter(&self) -> Duration {
        let cap = self.max_jitter.as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }
}

/// How an operation ultimately failed under [`execute`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was classified non-retryable and propagated unretried.
    Permanent(E),
    /// Every attempt failed retryably; carries the last error.
    Exhausted(E),
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) | Self::Exhausted(e) => e,
        }
    }
}

/// Run `operation`, retrying errors for which `is_retryable` returns true.
///
/// The operation is attempted once plus up to `policy.max_retries` more
/// times, sleeping the policy's backoff between attempts. Non-retryable
/// errors are returned immediately as [`RetryError::Permanent`].
pub async fn execute<T, E, F, Fut, C>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: C,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!(
                        "giving up after {} attempts: {}",
                        policy.max_retries + 1,
                        e
                    );
                    return Err(RetryError::Exhausted(e));
                }
                let delay = policy.delay_for_attempt(attempt) + policy.jitter();
                warn!(
                    "retryable upstream error (attempt {}/{}): {}. backing off {:?}",
                    attempt + 1,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Failure of a single outbound HTTP call, before retry classification.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed upstream response: {0}")]
    Decode(String),
}

impl CallError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Default retryability: 429, 503, timeouts, network failures, and
/// "unavailable"/"overloaded" style provider messages.
pub fn default_retryable(err: &CallError) -> bool {
    match err {
        CallError::Timeout | CallError::Network(_) => true,
        CallError::Decode(_) => false,
        CallError::Status { status, body } => {
            if matches!(status, 429 | 503) {
                return true;
            }
            let body = body.to_lowercase();
            body.contains("unavailable") || body.contains("overloaded")
        }
    }
}
