//! Per-worker consumption loop and job status transitions
//!
//! Each iteration takes one message off the queue and drives the job's
//! status record `IN_PROGRESS → SUCCESS | ERROR` around a pipeline run. A bad
//! message or a failed job never stops the loop; only the shutdown token does.


use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{ArchiveSummary, StreamingZipPipeline};
use crate::retry::{Backoff, IsRetryable, with_retry};
use crate::status::{JobDescription, JobStatus};
use crate::traits::{BlobStore, JobQueue, QueueMessage, StatusCache};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Identifies one in-flight run: `(worker_id, job key)`
///
/// A redelivered key can be running on two workers at once, so the job key
/// alone is not unique.
pub type ActiveJobId = (String, String);

/// In-flight runs mapped to the job's own cancellation token
pub type ActiveJobs = Arc<Mutex<HashMap<ActiveJobId, CancellationToken>>>;

/// How a consumed job ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Archive uploaded; `SUCCESS` written
    Succeeded(ArchiveSummary),
    /// Pipeline failed; `ERROR` written with this message
    Failed(String),
}

/// One worker identity consuming archive jobs from the shared consumer group
pub struct JobConsumer {
    worker_id: String,
    queue: Arc<dyn JobQueue>,
    cache: Arc<dyn StatusCache>,
    pipeline: StreamingZipPipeline,
    config: Arc<Config>,
    active_jobs: ActiveJobs,
}

impl JobConsumer {
    /// Create a consumer for `worker_id`
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        cache: Arc<dyn StatusCache>,
        store: Arc<dyn BlobStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            cache,
            pipeline: StreamingZipPipeline::new(store, &config),
            config,
            active_jobs: ActiveJobs::default(),
        }
    }

    /// Share an in-flight job registry (used by the pool for shutdown)
    pub fn with_active_jobs(mut self, active_jobs: ActiveJobs) -> Self {
        self.active_jobs = active_jobs;
        self
    }

    /// This consumer's identity within the consumer group
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Consume and process jobs until `shutdown` is cancelled
    ///
    /// Cancelling `shutdown` stops consumption of new messages. A job already
    /// running keeps going: it runs under its own token, reachable through
    /// the active job registry.
    pub async fn run(&self, shutdown: CancellationToken) {
        let stream = self.config.stream_name.as_str();
        let group = self.config.consumer_group.as_str();
        let worker_id = self.worker_id.as_str();

        tracing::info!(worker_id, stream, consumer_group = group, "consumer started");
        let mut backoff = Backoff::new(self.config.retry.clone());

        loop {
            tracing::debug!(worker_id, "waiting for message");
            let consumed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = self.queue.consume(stream, group, worker_id) => msg,
            };

            let message = match consumed {
                Ok(message) => {
                    backoff.reset();
                    message
                }
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "cannot consume message");
                    if !self.pause(&mut backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.process(&message).await {
                tracing::error!(worker_id, error = %e, "message dropped, job not started");
                if e.is_retryable() && !self.pause(&mut backoff, &shutdown).await {
                    break;
                }
            }
        }

        tracing::info!(worker_id, "consumer stopped");
    }

    /// Process one queue message end to end
    ///
    /// `IN_PROGRESS` is written before any source object is requested. Once
    /// the pipeline has run the outcome is always returned, even if the
    /// terminal status could not be written (that failure is logged).
    ///
    /// # Errors
    ///
    /// Returns an error, without running the pipeline, if the message cannot
    /// be decoded, the status record cannot be fetched or decoded, or the
    /// `IN_PROGRESS` write fails.
    pub async fn process(&self, message: &QueueMessage) -> Result<JobOutcome> {
        let job = JobDescription::from_message(message)?;
        let worker_id = self.worker_id.as_str();
        let key = job.key.as_str();

        tracing::info!(
            worker_id,
            key,
            zip_key = %job.zip_key,
            files = ?job.source_keys,
            "starting job"
        );

        let raw = self.cache.get(key).await?;
        let mut status = JobStatus::from_bytes(&raw)?;

        status.begin();
        self.persist(key, &status).await?;
        tracing::info!(worker_id, key, "job marked IN_PROGRESS");

        // Not a child of the loop's shutdown token
        let job_token = CancellationToken::new();
        let run_id = (self.worker_id.clone(), job.key.clone());
        self.active_jobs
            .lock()
            .await
            .insert(run_id.clone(), job_token.clone());

        let result = self
            .pipeline
            .run(&job_token, &job.zip_key, &job.source_keys)
            .await;

        self.active_jobs.lock().await.remove(&run_id);

        match result {
            Ok(summary) => {
                status.succeed()?;
                match self.persist(key, &status).await {
                    Ok(()) => tracing::info!(worker_id, key, "job marked SUCCESS"),
                    Err(e) => tracing::error!(
                        worker_id,
                        key,
                        error = %e,
                        "archive uploaded but SUCCESS could not be recorded"
                    ),
                }
                Ok(JobOutcome::Succeeded(summary))
            }
            Err(err) => {
                job_token.cancel();
                let message = err.to_string();
                tracing::error!(worker_id, key, error = %err, "archive job failed");

                status.fail(message.clone())?;
                match self.persist(key, &status).await {
                    Ok(()) => tracing::info!(worker_id, key, "job marked ERROR"),
                    Err(e) => tracing::error!(
                        worker_id,
                        key,
                        error = %e,
                        "job failed but ERROR could not be recorded"
                    ),
                }
                Ok(JobOutcome::Failed(message))
            }
        }
    }

    /// Upsert the status record, retrying transient cache failures
    async fn persist(&self, key: &str, status: &JobStatus) -> Result<()> {
        let bytes = status.to_bytes()?;
        let ttl = self.config.cache_ttl;
        with_retry(&self.config.retry, || self.cache.upsert(key, &bytes, ttl)).await
    }

    /// Sleep for the next backoff delay; false if shutdown interrupted it
    async fn pause(&self, backoff: &mut Backoff, shutdown: &CancellationToken) -> bool {
        let delay = backoff.next_delay();
        tracing::warn!(
            worker_id = %self.worker_id,
            failures = backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "backing off after transient failure"
        );

        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
