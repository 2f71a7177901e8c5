//! Worker pool: runs several consumers and coordinates their shutdown.

use crate::config::Config;
use crate::consumer::{ActiveJobs, JobConsumer};
use crate::error::Result;
use crate::traits::{BlobStore, JobQueue, StatusCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What happened during [`WorkerPool::shutdown`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All in-flight jobs finished before the drain deadline
    pub drained: bool,
    /// Job keys whose pipeline was cancelled at the deadline
    pub cancelled_jobs: Vec<String>,
}

/// A set of [`JobConsumer`] loops sharing one queue, cache and store
pub struct WorkerPool {
    shutdown: CancellationToken,
    workers: Vec<(String, JoinHandle<()>)>,
    active_jobs: ActiveJobs,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Validate `config` and spawn `worker_count` consumers
    ///
    /// Worker ids are `"{worker_id_prefix}-{n}"`. Must be called inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the configuration is invalid.
    pub fn start(
        config: Config,
        queue: Arc<dyn JobQueue>,
        cache: Arc<dyn StatusCache>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let shutdown = CancellationToken::new();
        let active_jobs = ActiveJobs::default();

        let workers = (0..config.worker_count)
            .map(|n| {
                let worker_id = config.worker_id(n);
                let consumer = JobConsumer::new(
                    worker_id.clone(),
                    Arc::clone(&queue),
                    Arc::clone(&cache),
                    Arc::clone(&store),
                    Arc::clone(&config),
                )
                .with_active_jobs(Arc::clone(&active_jobs));

                let token = shutdown.clone();
                let handle = tokio::spawn(async move { consumer.run(token).await });
                (worker_id, handle)
            })
            .collect();

        tracing::info!(workers = config.worker_count, "worker pool started");

        Ok(Self {
            shutdown,
            workers,
            active_jobs,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Ids of the running workers
    pub fn worker_ids(&self) -> Vec<&str> {
        self.workers.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Keys of the jobs currently in a pipeline run, sorted
    ///
    /// A key appears once per worker running it.
    pub async fn active_jobs(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active_jobs
            .lock()
            .await
            .keys()
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Stop consuming and wait for in-flight jobs
    ///
    /// 1. Cancels the loop token so no worker takes a new message
    /// 2. Waits up to `shutdown_timeout` for running jobs to finish
    /// 3. Past the deadline, cancels every remaining job's token; those jobs
    ///    end as `ERROR` ("cancelled") and their workers exit
    pub async fn shutdown(self) -> ShutdownReport {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport {
            drained: true,
            cancelled_jobs: Vec::new(),
        };

        for (worker_id, mut handle) in self.workers {
            if report.drained {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(joined) => {
                        log_join(&worker_id, joined);
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Timeout waiting for in-flight jobs, cancelling remaining jobs"
                        );
                        report.drained = false;
                        report.cancelled_jobs = cancel_active(&self.active_jobs).await;
                    }
                }
            }
            log_join(&worker_id, handle.await);
        }

        tracing::info!(
            drained = report.drained,
            cancelled = report.cancelled_jobs.len(),
            "Graceful shutdown complete"
        );
        report
    }
}

async fn cancel_active(active_jobs: &ActiveJobs) -> Vec<String> {
    let active = active_jobs.lock().await;
    let mut keys = Vec::with_capacity(active.len());
    for ((worker_id, key), token) in active.iter() {
        tracing::debug!(worker_id = %worker_id, key = %key, "cancelling in-flight job");
        token.cancel();
        keys.push(key.clone());
    }
    keys.sort();
    keys
}

fn log_join(worker_id: &str, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(worker_id, error = %e, "worker task ended abnormally");
    }
}
