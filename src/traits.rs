//! Seams for the external collaborators: job queue, status cache, blob store
//!
//! The worker only ever talks to these traits. Concrete backends (stream
//! queues, key-value caches, object stores) live outside this crate; the
//! [`crate::memory`] module provides in-process versions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Field map of one queue message
pub type QueueMessage = HashMap<String, String>;

/// Readable byte stream handed across the store boundary
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Consumer-group queue delivering job messages
///
/// Each message is delivered to one consumer of the named group. Delivery is
/// at-least-once; redelivered jobs are simply processed again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Block until the next message for `consumer` in `group` on `stream`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Queue`] on transport failure.
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> crate::Result<QueueMessage>;
}

/// Key-value cache with per-entry time-to-live holding job status records
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Fetch the raw value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the key is absent or expired and
    /// [`crate::Error::Cache`] on transport failure.
    async fn get(&self, key: &str) -> crate::Result<Vec<u8>>;

    /// Insert or overwrite the value under `key`, expiring after `ttl`
    async fn upsert(&self, key: &str, value: &[u8], ttl: Duration) -> crate::Result<()>;
}

/// Object store the archive sources are read from and the archive written to
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a download stream for `key`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the object does not exist and
    /// [`crate::Error::Store`] on transport failure.
    async fn download(&self, key: &str) -> crate::Result<ByteStream>;

    /// Store everything read from `body` under `key`
    ///
    /// Reads until end-of-stream; a read error aborts the upload.
    async fn upload(&self, key: &str, body: ByteStream) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &str {
        "blob-store"
    }
}
