//! Configuration types for zipwork

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the archive workers
///
/// Every field has a default, so `Config::default()` is a working
/// single-worker setup and partial JSON/TOML documents deserialize.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Queue stream the jobs are published on (default: "zip_download_jobs")
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Consumer group shared by all workers (default: "zip_workers")
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Time-to-live of every status write (default: 1 hour)
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub cache_ttl: Duration,

    /// Number of consumer loops the pool runs (default: 1)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Prefix for worker ids, which are `"{prefix}-{n}"` (default: "zip-worker")
    #[serde(default = "default_worker_id_prefix")]
    pub worker_id_prefix: String,

    /// Source keys containing this marker are not bundled (default: "logs.zip")
    ///
    /// Keeps a produced archive from including a previous archive of itself.
    #[serde(default = "default_archive_marker")]
    pub archive_marker: String,

    /// Bytes of archive data buffered between compressor and uploader (default: 64 KiB)
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Backoff for transient queue/cache failures and status write retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// How long shutdown waits for in-flight jobs before cancelling them (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_name: default_stream_name(),
            consumer_group: default_consumer_group(),
            cache_ttl: default_cache_ttl(),
            worker_count: default_worker_count(),
            worker_id_prefix: default_worker_id_prefix(),
            archive_marker: default_archive_marker(),
            pipe_capacity: default_pipe_capacity(),
            retry: RetryConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Check the settings the workers cannot run without
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("stream_name", &self.stream_name),
            ("consumer_group", &self.consumer_group),
            ("worker_id_prefix", &self.worker_id_prefix),
            ("archive_marker", &self.archive_marker),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(config_error(key, format!("{} must not be empty", key)));
            }
        }

        if self.worker_count == 0 {
            return Err(config_error(
                "worker_count",
                "at least one worker is required",
            ));
        }

        if self.pipe_capacity == 0 {
            return Err(config_error(
                "pipe_capacity",
                "pipe capacity must be greater than zero",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "retry.backoff_multiplier",
                format!(
                    "backoff multiplier must be at least 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
            ));
        }

        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "retry.initial_delay",
                "initial delay must not exceed max delay",
            ));
        }

        Ok(())
    }

    /// Worker id for the `n`th consumer loop
    pub fn worker_id(&self, n: usize) -> String {
        format!("{}-{}", self.worker_id_prefix, n)
    }
}

fn config_error(key: &str, message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Retry behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_stream_name() -> String {
    "zip_download_jobs".to_string()
}

fn default_consumer_group() -> String {
    "zip_workers".to_string()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_worker_count() -> usize {
    1
}

fn default_worker_id_prefix() -> String {
    "zip-worker".to_string()
}

fn default_archive_marker() -> String {
    "logs.zip".to_string()
}

fn default_pipe_capacity() -> usize {
    64 * 1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
