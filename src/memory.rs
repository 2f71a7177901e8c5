//! In-process queue, cache and blob store
//!
//! These implement the collaborator traits without any external service.
//! They back the test suite and let the worker be embedded in a single
//! process; they are not meant to replace a real stream queue or object store.

use crate::error::{Error, Result};
use crate::status::JobDescription;
use crate::traits::{BlobStore, ByteStream, JobQueue, QueueMessage, StatusCache};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::Instant;

/// Single-stream queue where every message goes to exactly one consumer
///
/// All consumers share one receiver, which gives consumer-group delivery:
/// concurrent `consume` calls each get a different message.
pub struct MemoryQueue {
    stream: String,
    tx: mpsc::UnboundedSender<QueueMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
}

impl MemoryQueue {
    /// Create an empty queue for `stream`
    pub fn new(stream: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            stream: stream.into(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue a job description under the job field
    pub fn publish(&self, job: &JobDescription) -> Result<()> {
        self.publish_raw(job.to_message()?)
    }

    /// Enqueue an arbitrary message
    pub fn publish_raw(&self, message: QueueMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::Queue("queue closed".to_string()))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn consume(&self, stream: &str, _group: &str, _consumer: &str) -> Result<QueueMessage> {
        if stream != self.stream {
            return Err(Error::Queue(format!("unknown stream '{}'", stream)));
        }
        // The queue holds its own sender, so recv only returns None after close
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Queue("queue closed".to_string()))
    }
}

/// Key-value cache with lazy TTL expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    /// Whether no live entries remain
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StatusCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > now => return Ok(value.clone()),
                Some(_) => {}
                None => return Err(Error::NotFound(key.to_string())),
            }
        }
        // Expired: evict so it no longer counts
        self.entries.write().await.remove(key);
        Err(Error::NotFound(key.to_string()))
    }

    async fn upsert(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_vec(), expires));
        Ok(())
    }
}

/// Map-backed object store
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object directly
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    /// Read an object directly
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn download(&self, key: &str) -> Result<ByteStream> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn upload(&self, key: &str, mut body: ByteStream) -> Result<()> {
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| Error::Store(format!("reading upload body for {}: {}", key, e)))?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
