//! Common test utilities for zipwork integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zipwork::memory::{MemoryCache, MemoryQueue, MemoryStore};
use zipwork::{Config, JobDescription, JobStatus, Status, StatusCache};

/// In-memory backends wired for one test
pub struct Backends {
    pub queue: Arc<MemoryQueue>,
    pub cache: Arc<MemoryCache>,
    pub store: Arc<MemoryStore>,
}

impl Backends {
    pub fn new(config: &Config) -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new(config.stream_name.clone())),
            cache: Arc::new(MemoryCache::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Seed a PENDING record and enqueue the job, as a producer would
    pub async fn submit(&self, key: &str, sources: &[&str]) -> JobDescription {
        let job = JobDescription {
            key: key.to_string(),
            zip_key: format!("{}/logs.zip", key),
            source_keys: sources.iter().map(|s| s.to_string()).collect(),
        };
        self.cache
            .upsert(
                key,
                &JobStatus::new(Status::Pending).to_bytes().unwrap(),
                Duration::from_secs(600),
            )
            .await
            .unwrap();
        self.queue.publish(&job).unwrap();
        job
    }
}

/// Poll the cache until `key` reaches a terminal status
pub async fn wait_for_terminal(cache: &MemoryCache, key: &str, timeout: Duration) -> JobStatus {
    let start = Instant::now();
    loop {
        if let Ok(raw) = cache.get(key).await {
            let status = JobStatus::from_bytes(&raw).unwrap();
            if status.status.is_terminal() {
                return status;
            }
        }
        assert!(
            start.elapsed() < timeout,
            "job {} did not finish within {:?}",
            key,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Entry `(name, content)` pairs of a stored archive, in archive order
pub fn archive_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            (file.name().to_string(), content)
        })
        .collect()
}

pub fn test_config(workers: usize) -> Config {
    Config {
        stream_name: "zip_jobs".into(),
        worker_count: workers,
        ..Default::default()
    }
}
