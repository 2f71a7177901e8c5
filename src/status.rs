//! Job description and job status records
//!
//! Both travel as JSON: the job description inside a queue message field, the
//! status record as the opaque value stored in the status cache.

use crate::error::{Error, Result};
use crate::traits::QueueMessage;
use serde::{Deserialize, Serialize};

/// Queue message field holding the JSON-encoded [`JobDescription`]
pub const JOB_FIELD: &str = "prefix";

/// One request to bundle stored objects into a single archive
///
/// Created by the producer before enqueueing and never mutated here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Logical job id, also the status cache key
    pub key: String,
    /// Destination object key for the produced archive
    pub zip_key: String,
    /// Ordered object keys to bundle
    #[serde(rename = "files_in_page")]
    pub source_keys: Vec<String>,
}

impl JobDescription {
    /// Decode the job carried by a queue message
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the job field is missing and
    /// [`Error::Serialization`] if it is not a valid job description.
    pub fn from_message(message: &QueueMessage) -> Result<Self> {
        let raw = message
            .get(JOB_FIELD)
            .ok_or_else(|| Error::InvalidMessage(format!("missing '{}' field", JOB_FIELD)))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode this job into a queue message
    pub fn to_message(&self) -> Result<QueueMessage> {
        let mut message = QueueMessage::new();
        message.insert(JOB_FIELD.to_string(), serde_json::to_string(self)?);
        Ok(message)
    }
}

/// Job status as seen by pollers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Set by the producer before enqueueing
    Pending,
    /// A worker has picked the job up
    InProgress,
    /// Archive uploaded
    Success,
    /// Archive job failed, see the status message
    Error,
}

impl Status {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::InProgress => "IN_PROGRESS",
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
        }
    }

    /// Whether no further transition is allowed within a processing pass
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Error)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record stored in the cache under the job key
///
/// Fields the producer stored alongside `status`/`message` are kept in
/// `extra` and written back unchanged on every transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current status
    pub status: Status,
    /// Error detail, empty unless `status` is `ERROR`
    #[serde(default)]
    pub message: String,
    /// Producer-owned fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobStatus {
    /// Fresh record with no message or extra fields
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Decode a record fetched from the cache
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode for the cache
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Start a processing pass.
    ///
    /// Allowed from any state: a redelivered job starts a new pass even if an
    /// earlier pass already wrote a terminal state.
    pub fn begin(&mut self) {
        self.status = Status::InProgress;
        self.message.clear();
    }

    /// Finish the pass successfully
    pub fn succeed(&mut self) -> Result<()> {
        self.advance(Status::Success)?;
        self.message.clear();
        Ok(())
    }

    /// Finish the pass with an error message for pollers
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.advance(Status::Error)?;
        self.message = message.into();
        Ok(())
    }

    fn advance(&mut self, to: Status) -> Result<()> {
        if self.status != Status::InProgress || !to.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
