//! Retry logic with exponential backoff
//!
//! Two uses in the worker:
//! - [`with_retry`] wraps a single operation (status writes) and retries it
//!   while the error is transient.
//! - [`Backoff`] paces the consumer loop after consecutive transient failures
//!   so a queue or cache outage does not turn into a busy loop.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use zipwork::memory::MemoryCache;
//! use zipwork::retry::with_retry;
//! use zipwork::{RetryConfig, StatusCache};
//!
//! # async fn example() -> zipwork::Result<()> {
//! let cache = MemoryCache::new();
//! let record = br#"{"status":"PENDING"}"#;
//! with_retry(&RetryConfig::default(), || {
//!     cache.upsert("job-1", record, Duration::from_secs(3600))
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transport failures (queue, cache, store unreachable; connection reset) return `true`.
/// Missing keys, malformed data, pipeline failures and cancellation return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Collaborator transport errors are the transient class
            Error::Queue(_) | Error::Cache(_) | Error::Store(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A missing key stays missing
            Error::NotFound(_) => false,
            // Pipeline failures are recorded on the job, never retried
            Error::Pipeline(_) => false,
            Error::InvalidMessage(_) | Error::Serialization(_) => false,
            Error::InvalidTransition { .. } => false,
            Error::Config { .. } => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures up to `config.max_attempts` times
///
/// Delays follow [`Backoff`]. A non-retryable error is returned at once;
/// after the last retry the final error is returned.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        let err = match operation().await {
            Ok(value) => {
                if backoff.failures() > 0 {
                    tracing::info!(retries = backoff.failures(), "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            tracing::debug!(error = %err, "not retrying permanent failure");
            return Err(err);
        }
        if backoff.failures() >= config.max_attempts {
            tracing::error!(
                error = %err,
                attempts = backoff.failures() + 1,
                "giving up after retries"
            );
            return Err(err);
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            error = %err,
            retry = backoff.failures(),
            max_retries = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Delay pacing for a loop that keeps going after transient failures
///
/// Unlike [`with_retry`] there is no attempt limit: the consumer loop never
/// gives up, it only slows down. The first failure waits `initial_delay`, each
/// further consecutive failure multiplies it up to `max_delay`, and
/// [`Backoff::reset`] returns to the start after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
    current: Duration,
}

impl Backoff {
    /// Create a backoff at its initial delay
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            failures: 0,
            current,
        }
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.failures = self.failures.saturating_add(1);
        self.current = next_delay(&self.config, self.current);

        if self.config.jitter {
            add_jitter(delay).min(self.config.max_delay)
        } else {
            delay
        }
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Back to the initial delay after a success
    pub fn reset(&mut self) {
        self.failures = 0;
        self.current = self.config.initial_delay;
    }
}

fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    let next = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
    next.min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
