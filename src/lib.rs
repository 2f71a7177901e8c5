//! # zipwork
//!
//! Background worker that turns queued "bundle these stored objects into one
//! archive" requests into pollable job outcomes.
//!
//! ## Design Philosophy
//!
//! zipwork is designed to be:
//! - **Streaming** - Sources are downloaded, zipped and uploaded through a
//!   bounded pipe; the archive is never held in memory
//! - **Backend-agnostic** - Queue, status cache and blob store are traits
//! - **Library-first** - No CLI or UI; worker count and ids come from the host
//! - **Pollable** - Every job's status record moves `IN_PROGRESS → SUCCESS | ERROR`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipwork::memory::{MemoryCache, MemoryQueue, MemoryStore};
//! use zipwork::{Config, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         worker_count: 4,
//!         ..Default::default()
//!     };
//!
//!     let pool = WorkerPool::start(
//!         config.clone(),
//!         Arc::new(MemoryQueue::new(config.stream_name.clone())),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(MemoryStore::new()),
//!     )?;
//!
//!     // Run until the host decides to stop, e.g. on SIGTERM
//!     tokio::signal::ctrl_c().await?;
//!     let report = pool.shutdown().await;
//!     println!("drained: {}", report.drained);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Per-worker job consumption loop
pub mod consumer;
/// Error types
pub mod error;
/// In-process queue, cache and store
pub mod memory;
/// Streaming zip pipeline
pub mod pipeline;
/// Worker pool and shutdown coordination
pub mod pool;
/// Retry logic with exponential backoff
pub mod retry;
/// Job description and status records
pub mod status;
/// Collaborator traits
pub mod traits;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, RetryConfig};
pub use consumer::{JobConsumer, JobOutcome};
pub use error::{Error, PipelineError, Result, Stage};
pub use pipeline::{ArchiveSummary, StreamingZipPipeline};
pub use pool::{ShutdownReport, WorkerPool};
pub use status::{JobDescription, JobStatus, Status};
pub use traits::{BlobStore, ByteStream, JobQueue, QueueMessage, StatusCache};
