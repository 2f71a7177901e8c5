//! Error types for zipwork
//!
//! This module provides the error handling for the worker, including:
//! - Collaborator errors (queue, cache, blob store) classified for backoff
//! - Stage-tagged pipeline errors whose text is persisted for status pollers
//! - Configuration and message-decoding errors

use crate::status::Status;
use thiserror::Error;

/// Result type alias for zipwork operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zipwork
///
/// Each variant carries enough context to be logged once by the consumer
/// loop; nothing here is retried unless [`crate::retry::IsRetryable`] says so.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "stream_name")
        key: Option<String>,
    },

    /// Queue transport failure (consume could not deliver a message)
    #[error("queue error: {0}")]
    Queue(String),

    /// Status cache transport failure
    #[error("cache error: {0}")]
    Cache(String),

    /// Blob store transport failure
    #[error("store error: {0}")]
    Store(String),

    /// Cache entry or stored object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Archive pipeline failed in a specific stage
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// Queue message did not carry a usable job description
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Job status transition that would move backwards or out of a terminal state
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Status currently recorded
        from: Status,
        /// Status that was requested
        to: Status,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (job description or status record)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation was cancelled through its cancellation token
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Pipeline stage in which an archive job failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Opening a download stream for a source object
    Download,
    /// Starting a new archive entry
    Zip,
    /// Copying source bytes into the archive entry
    Copy,
    /// Finishing the archive (central directory) and closing the pipe
    Close,
    /// Streaming the archive into the blob store
    Upload,
}

impl Stage {
    /// Short tag used in error text
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Zip => "zip",
            Stage::Copy => "copy",
            Stage::Close => "close",
            Stage::Upload => "upload",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-tagged archive pipeline failure
///
/// Rendered as `"<stage>: <key>: <reason>"`. This exact text becomes the
/// `message` of the job's `ERROR` status.
#[derive(Debug, Clone, Error)]
#[error("{stage}: {key}: {reason}")]
pub struct PipelineError {
    /// Stage that failed
    pub stage: Stage,
    /// Object key being processed (source key, or archive key for close/upload)
    pub key: String,
    /// Underlying failure text
    pub reason: String,
}

impl PipelineError {
    /// Tag an underlying error with the stage and key it occurred in
    pub fn new(stage: Stage, key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            stage,
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl Error {
    /// Stage tag if this is a pipeline failure
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Pipeline(e) => Some(e.stage),
            _ => None,
        }
    }
}
