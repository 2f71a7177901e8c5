//! Streaming download → zip → upload pipeline
//!
//! One job runs two tasks joined through an in-process byte pipe:
//!
//! - the **compressor** (blocking thread) downloads each source object in
//!   order and writes it as a zip entry into the pipe's write end;
//! - the **uploader** hands the pipe's read end to [`BlobStore::upload`].
//!
//! The pipe holds at most `pipe_capacity` bytes, so a write blocks until the
//! uploader has drained earlier bytes and the archive is never materialized.
//! The first task error cancels the shared token and is the only error
//! returned; the other task's (consequential) error is discarded. A pipe
//! write rejected because the uploader stopped reading is reported as an
//! upload failure of the archive.

mod compress;
mod fail_fast;


use crate::config::Config;
use crate::error::{Error, PipelineError, Result, Stage};
use crate::traits::BlobStore;
use compress::CompressJob;
use fail_fast::FailFast;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

/// What a successful run put into the archive
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Entry names in archive order
    pub entries: Vec<String>,
    /// Source keys left out because they contain the archive marker
    pub skipped: Vec<String>,
    /// Uncompressed bytes copied from the sources
    pub bytes_in: u64,
}

/// Builds one zip archive from stored objects and streams it back to the store
#[derive(Clone)]
pub struct StreamingZipPipeline {
    store: Arc<dyn BlobStore>,
    archive_marker: String,
    pipe_capacity: usize,
}

impl StreamingZipPipeline {
    /// Create a pipeline over `store` using the marker and pipe size from `config`
    pub fn new(store: Arc<dyn BlobStore>, config: &Config) -> Self {
        Self {
            store,
            archive_marker: config.archive_marker.clone(),
            pipe_capacity: config.pipe_capacity,
        }
    }

    /// Bundle `source_keys` into an archive stored at `zip_key`
    ///
    /// Entries keep the order of `source_keys` and are named after them
    /// verbatim; keys containing the archive marker are skipped. Cancelling
    /// `cancel` aborts both tasks and yields [`Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the first stage-tagged [`PipelineError`] (download, zip, copy,
    /// close or upload) raised by either task.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        zip_key: &str,
        source_keys: &[String],
    ) -> Result<ArchiveSummary> {
        tracing::info!(
            zip_key,
            files = source_keys.len(),
            store = self.store.name(),
            "starting archive pipeline"
        );

        let group = Arc::new(FailFast::new(cancel.child_token()));
        let (upload_end, compress_end) = tokio::io::duplex(self.pipe_capacity);

        let upload = tokio::spawn(upload(
            Arc::clone(&self.store),
            Arc::clone(&group),
            zip_key.to_string(),
            upload_end,
        ));

        let job = CompressJob {
            handle: tokio::runtime::Handle::current(),
            store: Arc::clone(&self.store),
            group: Arc::clone(&group),
            zip_key: zip_key.to_string(),
            source_keys: source_keys.to_vec(),
            archive_marker: self.archive_marker.clone(),
        };
        let compress = tokio::task::spawn_blocking(move || job.run(compress_end));

        let (uploaded, compressed) = tokio::join!(upload, compress);

        if let Err(e) = uploaded {
            group.fail(Error::Other(format!("upload task failed: {}", e)));
        }
        let summary = match compressed {
            Ok(summary) => summary,
            Err(e) => {
                group.fail(Error::Other(format!("compress task failed: {}", e)));
                None
            }
        };

        if let Some(err) = group.take() {
            tracing::warn!(zip_key, error = %err, "archive pipeline failed");
            return Err(err);
        }

        let summary = summary
            .ok_or_else(|| Error::Other("compressor finished without a summary".to_string()))?;
        tracing::info!(
            zip_key,
            entries = summary.entries.len(),
            skipped = summary.skipped.len(),
            bytes_in = summary.bytes_in,
            "archive uploaded"
        );
        Ok(summary)
    }
}

/// Uploader task: streams the pipe's read end into the store
async fn upload(
    store: Arc<dyn BlobStore>,
    group: Arc<FailFast>,
    zip_key: String,
    body: DuplexStream,
) {
    let result = tokio::select! {
        biased;
        _ = group.token().cancelled() => Err(Error::Cancelled),
        res = store.upload(&zip_key, Box::new(body)) => {
            res.map_err(|e| PipelineError::new(Stage::Upload, &zip_key, e).into())
        }
    };

    if let Err(err) = result {
        group.fail(err);
    }
}
