//! Test doubles shared by the unit test modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::{Error, Result};
use crate::memory::{MemoryCache, MemoryStore};
use crate::status::{JobStatus, Status};
use crate::traits::{BlobStore, ByteStream, JobQueue, QueueMessage, StatusCache};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};

/// Ordered record of collaborator calls, shared between doubles
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Decode the status record stored under `key`
pub(crate) async fn read_status(cache: &dyn StatusCache, key: &str) -> JobStatus {
    let raw = cache.get(key).await.expect("status record present");
    JobStatus::from_bytes(&raw).expect("status record decodes")
}

/// Store a PENDING record the way a producer would before enqueueing
pub(crate) async fn seed_pending(cache: &dyn StatusCache, key: &str) {
    cache
        .upsert(
            key,
            &JobStatus::new(Status::Pending).to_bytes().unwrap(),
            Duration::from_secs(600),
        )
        .await
        .unwrap();
}

/// Read every entry of an archive as `(name, content)` in archive order
pub(crate) fn archive_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            std::io::Read::read_to_end(&mut file, &mut content).unwrap();
            (file.name().to_string(), content)
        })
        .collect()
}

// --- cache ---

/// Cache wrapper that logs calls and injects failures
pub(crate) struct RecordingCache {
    inner: MemoryCache,
    log: EventLog,
    fail_get: AtomicBool,
    failing_upserts: AtomicU32,
    upserts: AtomicU32,
}

impl RecordingCache {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            inner: MemoryCache::new(),
            log,
            fail_get: AtomicBool::new(false),
            failing_upserts: AtomicU32::new(0),
            upserts: AtomicU32::new(0),
        }
    }

    /// Make every `get` fail with a transport error
    pub(crate) fn fail_gets(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }

    /// Make the next `n` upserts fail with a transport error
    pub(crate) fn fail_next_upserts(&self, n: u32) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Upsert calls that reached the cache (successful or not)
    pub(crate) fn upsert_calls(&self) -> u32 {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusCache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.log.lock().unwrap().push(format!("get:{}", key));
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Error::Cache("connection refused".to_string()));
        }
        self.inner.get(key).await
    }

    async fn upsert(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let status = JobStatus::from_bytes(value)
            .map(|s| s.status.to_string())
            .unwrap_or_else(|_| "?".to_string());
        self.log
            .lock()
            .unwrap()
            .push(format!("upsert:{}:{}", key, status));

        let failing = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Cache("write timed out".to_string()));
        }
        self.inner.upsert(key, value, ttl).await
    }
}

// --- store ---

/// Store wrapper that logs calls, tracks open download streams and can
/// reject uploads
pub(crate) struct RecordingStore {
    pub(crate) inner: Arc<MemoryStore>,
    log: EventLog,
    open_streams: Arc<AtomicUsize>,
    fail_upload: AtomicBool,
    broken_sources: Mutex<HashMap<String, u64>>,
}

impl RecordingStore {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            log,
            open_streams: Arc::new(AtomicUsize::new(0)),
            fail_upload: AtomicBool::new(false),
            broken_sources: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, key: &str, data: &[u8]) {
        self.inner.insert(key, data.to_vec()).await;
    }

    /// Download streams opened and not yet dropped
    pub(crate) fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Reject uploads after reading part of the body
    pub(crate) fn fail_uploads(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }

    /// Make the download of `key` fail with a reset after `after` bytes
    pub(crate) fn break_source(&self, key: &str, after: u64) {
        self.broken_sources
            .lock()
            .unwrap()
            .insert(key.to_string(), after);
    }

    /// Keys passed to `download`, in call order
    pub(crate) fn downloads(&self) -> Vec<String> {
        events(&self.log)
            .into_iter()
            .filter_map(|e| e.strip_prefix("download:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn download(&self, key: &str) -> Result<ByteStream> {
        self.log.lock().unwrap().push(format!("download:{}", key));
        let mut inner = self.inner.download(key).await?;
        let broken = self.broken_sources.lock().unwrap().get(key).copied();
        if let Some(after) = broken {
            inner = Box::new(inner.take(after).chain(ResetStream));
        }
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedStream {
            inner,
            open: Arc::clone(&self.open_streams),
        }))
    }

    async fn upload(&self, key: &str, mut body: ByteStream) -> Result<()> {
        self.log.lock().unwrap().push(format!("upload:{}", key));
        if self.fail_upload.load(Ordering::SeqCst) {
            let mut head = [0u8; 16];
            let _ = body.read(&mut head).await;
            return Err(Error::Store("bucket unavailable".to_string()));
        }
        self.inner.upload(key, body).await
    }
}

/// Download stream that decrements the open counter when dropped
struct TrackedStream {
    inner: ByteStream,
    open: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stream that fails every read with a connection reset
struct ResetStream;

impl AsyncRead for ResetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

/// Store whose downloads only start after a delay
pub(crate) struct SlowStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowStore {
    pub(crate) fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl BlobStore for SlowStore {
    async fn download(&self, key: &str) -> Result<ByteStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.download(key).await
    }

    async fn upload(&self, key: &str, body: ByteStream) -> Result<()> {
        self.inner.upload(key, body).await
    }
}

/// Store whose downloads deliver a few bytes and then go silent
///
/// The write end of every download is kept open, so a read past the
/// delivered bytes waits until the stream is dropped.
pub(crate) struct StallingStore {
    inner: Arc<MemoryStore>,
    writers: tokio::sync::Mutex<Vec<DuplexStream>>,
    open: Arc<AtomicUsize>,
}

impl StallingStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            writers: tokio::sync::Mutex::new(Vec::new()),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Download streams opened and not yet dropped
    pub(crate) fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for StallingStore {
    async fn download(&self, _key: &str) -> Result<ByteStream> {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(1024);
        writer.write_all(b"partial data\n").await?;
        self.writers.lock().await.push(writer);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedStream {
            inner: Box::new(reader),
            open: Arc::clone(&self.open),
        }))
    }

    async fn upload(&self, key: &str, body: ByteStream) -> Result<()> {
        self.inner.upload(key, body).await
    }
}

// --- queue ---

/// Queue that always fails and counts attempts
#[derive(Default)]
pub(crate) struct BrokenQueue {
    pub(crate) attempts: AtomicU32,
}

#[async_trait]
impl JobQueue for BrokenQueue {
    async fn consume(&self, _stream: &str, _group: &str, _consumer: &str) -> Result<QueueMessage> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Queue("connection reset".to_string()))
    }
}
