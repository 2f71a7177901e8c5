//! Compressor side of the pipeline: downloads sources in order and writes them
//! as zip entries into the pipe.

use super::ArchiveSummary;
use super::fail_fast::FailFast;
use crate::error::{Error, PipelineError, Result, Stage};
use crate::traits::{BlobStore, ByteStream};
use std::fmt::Display;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipWriter;
use zip::write::{SimpleFileOptions, StreamWriter};

type Encoder = ZipWriter<StreamWriter<ArchiveSink>>;

/// Everything the compressor needs, moved onto a blocking thread
pub(super) struct CompressJob {
    pub(super) handle: Handle,
    pub(super) store: Arc<dyn BlobStore>,
    pub(super) group: Arc<FailFast>,
    pub(super) zip_key: String,
    pub(super) source_keys: Vec<String>,
    pub(super) archive_marker: String,
}

impl CompressJob {
    /// Build the archive into the write end of the pipe.
    ///
    /// Must run on a blocking thread. The encoder is finished exactly once on
    /// every path, and the pipe writer is dropped when this returns.
    /// Failures are reported through the group, not the return value.
    pub(super) fn run(self, pipe: DuplexStream) -> Option<ArchiveSummary> {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = ArchiveSink {
            pipe: SyncIoBridge::new_with_handle(pipe, self.handle.clone()),
            closed: Arc::clone(&closed),
        };
        let mut zip = ZipWriter::new_stream(sink);
        let mut summary = ArchiveSummary::default();

        match self.write_entries(&mut zip, &mut summary, &closed) {
            Ok(()) => match zip.finish() {
                Ok(_pipe) => {
                    debug!(
                        zip_key = %self.zip_key,
                        entries = summary.entries.len(),
                        "archive finished"
                    );
                    Some(summary)
                }
                Err(e) => {
                    let err = self.tag(Stage::Close, &self.zip_key, e, &closed);
                    self.group.fail(err);
                    None
                }
            },
            Err(err) => {
                // Cancel first: the uploader must not see a clean end of stream
                // for an archive that is missing entries.
                self.group.fail(err);
                closed.store(true, Ordering::SeqCst);
                if let Err(e) = zip.finish() {
                    debug!(zip_key = %self.zip_key, error = %e, "closing aborted archive");
                }
                None
            }
        }
    }

    fn write_entries(
        &self,
        zip: &mut Encoder,
        summary: &mut ArchiveSummary,
        closed: &AtomicBool,
    ) -> Result<()> {
        for key in &self.source_keys {
            if key.contains(&self.archive_marker) {
                debug!(key = %key, "skipping aggregate archive");
                summary.skipped.push(key.clone());
                continue;
            }

            if self.group.token().is_cancelled() {
                return Err(Error::Cancelled);
            }

            let download = self
                .handle
                .block_on(self.open(key))
                .map_err(|e| self.tag(Stage::Download, key, e, closed))?;

            // Sizes are unknown up front when streaming, so always allow zip64
            let options = SimpleFileOptions::default().large_file(true);
            zip.start_file(key.as_str(), options)
                .map_err(|e| self.tag(Stage::Zip, key, e, closed))?;

            // Dropping the reader closes the download stream, including on `?`
            let mut source = SourceReader {
                stream: download,
                token: self.group.token(),
                handle: &self.handle,
            };
            let copied = io::copy(&mut source, zip)
                .map_err(|e| self.tag(Stage::Copy, key, e, closed))?;
            drop(source);

            debug!(key = %key, bytes = copied, "entry written");
            summary.entries.push(key.clone());
            summary.bytes_in += copied;
        }

        Ok(())
    }

    async fn open(&self, key: &str) -> Result<ByteStream> {
        tokio::select! {
            biased;
            _ = self.group.token().cancelled() => Err(Error::Cancelled),
            res = self.store.download(key) => res,
        }
    }

    /// Attribute a failure to its stage
    ///
    /// Once the group is cancelled every failure is a consequence and becomes
    /// [`Error::Cancelled`]. A write the pipe rejected means the uploader went
    /// away, so it is charged to the upload of the archive.
    fn tag(&self, stage: Stage, key: &str, err: impl Display, closed: &AtomicBool) -> Error {
        if self.group.token().is_cancelled() {
            Error::Cancelled
        } else if closed.load(Ordering::SeqCst) {
            PipelineError::new(Stage::Upload, &self.zip_key, err).into()
        } else {
            PipelineError::new(stage, key, err).into()
        }
    }
}

/// Write end of the archive pipe as seen by the encoder
///
/// After the first failed write, or once the job is aborted, writes are
/// accepted and discarded so the encoder can be finished without touching
/// the pipe again.
struct ArchiveSink {
    pipe: SyncIoBridge<DuplexStream>,
    closed: Arc<AtomicBool>,
}

impl Write for ArchiveSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(buf.len());
        }
        self.pipe.write(buf).inspect_err(|_| {
            self.closed.store(true, Ordering::SeqCst);
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.pipe.flush()
    }
}

/// Download stream read from the blocking thread
///
/// Every read races the group token, so a stalled source cannot hold the
/// compressor past cancellation.
struct SourceReader<'a> {
    stream: ByteStream,
    token: &'a CancellationToken,
    handle: &'a Handle,
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Self {
            stream,
            token,
            handle,
        } = self;
        handle.block_on(async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(io::Error::other("cancelled")),
                read = stream.read(buf) => read,
            }
        })
    }
}
