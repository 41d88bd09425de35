//! Resumable upload pass.
//!
//! # Pass
//!
//! ```text
//! load cursor ──► read complete lines from cursor
//!                   │
//!                   ├─ header (offset 0)      skip
//!                   ├─ malformed              warn, skip
//!                   ├─ status not good        skip
//!                   └─ projected record
//!                        │ does not fit? ──► flush (retry until accepted)
//!                        │                   commit cursor at boundary before this line
//!                        │                   reset batch
//!                        └─ push
//! end of stream ──► flush if non-empty ──► commit cursor at last boundary
//! ```
//!
//! Every skipped line still counts as consumed, so the cursor never stalls on
//! a bad record. A flush that exhausts its retry policy aborts the pass with
//! the cursor left at the last commit; the next pass re-sends from there.
//!
//! # Preconditions
//!
//! The store must not be appended to while a pass runs. The batcher is not
//! re-entrant.

use tracing::{debug, error, info, warn};

use crate::batch::{BatchLimits, UploadBatch};
use crate::cursor::{load_or_start, Cursor, CursorStore};
use crate::delivery::{DeliveryClient, Network};
use crate::error::{DeliveryError, RecordError, Result};
use crate::retry::{RetryPolicy, Sleep};
use crate::store::{Line, LogStore};
use crate::transform::RecordProjector;
use crate::volume::Volume;

/// Tunables for one batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub limits: BatchLimits,
    /// Applied to every flush
    pub retry: RetryPolicy,
    /// Write key placed in every batch preamble
    pub api_key: String,
}

impl UploadConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            limits: BatchLimits::default(),
            retry: RetryPolicy::default(),
            api_key: api_key.into(),
        }
    }
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Cursor the pass started from
    pub start: Cursor,
    /// Cursor committed at the end
    pub end: Cursor,
    /// Batches accepted by the endpoint
    pub batches_sent: u64,
    /// Delivery attempts, retries included
    pub attempts: u64,
    pub rejections: u64,
    pub connection_failures: u64,
    /// Records inside accepted batches
    pub records_uploaded: u64,
    /// Lines skipped for a non-good status
    pub filtered: u64,
    /// Lines skipped as unparsable
    pub malformed: u64,
    /// Records skipped as too large for any batch
    pub oversized: u64,
    /// Bytes of complete lines read
    pub bytes_scanned: u64,
}

impl PassReport {
    fn new(start: Cursor) -> Self {
        Self {
            start,
            end: start,
            ..Self::default()
        }
    }

    /// Whether the pass found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.bytes_scanned == 0 && self.attempts == 0
    }
}

/// Owns the delivery client, the cursor and the retry sleeper for upload
/// passes over a [`LogStore`].
#[derive(Debug)]
pub struct UploadBatcher<N, C, S> {
    client: DeliveryClient<N>,
    cursor_store: C,
    sleeper: S,
    config: UploadConfig,
}

impl<N, C, S> UploadBatcher<N, C, S>
where
    N: Network,
    C: CursorStore,
    S: Sleep,
{
    pub fn new(client: DeliveryClient<N>, cursor_store: C, sleeper: S, config: UploadConfig) -> Self {
        Self {
            client,
            cursor_store,
            sleeper,
            config,
        }
    }

    pub fn client(&self) -> &DeliveryClient<N> {
        &self.client
    }

    pub fn cursor_store(&self) -> &C {
        &self.cursor_store
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Forget all upload progress. Call after [`LogStore::recreate`].
    pub fn reset_cursor(&mut self) -> Result<()> {
        info!("upload cursor reset");
        self.cursor_store.save(Cursor::START)
    }

    /// Upload everything after the saved cursor.
    ///
    /// # Errors
    /// - `DeliveryError::RetriesExhausted` if a flush gives up; records up to
    ///   the last committed cursor stay uploaded
    /// - storage and cursor I/O errors
    pub fn run_upload_pass<V: Volume>(&mut self, store: &LogStore<V>) -> Result<PassReport> {
        let store_len = store.len()?;
        let loaded = load_or_start(&mut self.cursor_store)?;
        let start = if loaded.offset() > store_len {
            warn!(
                cursor = loaded.offset(),
                store_len, "cursor is past the end of the store, rescanning from the start"
            );
            Cursor::START
        } else {
            loaded
        };

        let pending = store_len - start.offset();
        let projector = self.projector_for(store);
        let mut batch = UploadBatch::new(&self.config.api_key, self.config.limits)?;
        let mut report = PassReport::new(start);
        let mut committed = loaded;
        let mut boundary = start.offset();

        info!(cursor = start.offset(), pending, "upload pass started");

        for line in store.read_from(start.offset())? {
            let line = line?;
            report.bytes_scanned += line.bytes.len() as u64;

            if line.is_header() {
                boundary = line.end;
                continue;
            }

            match project_line(&projector, &line) {
                Ok(Some(record)) if !batch.can_ever_fit(&record) => {
                    warn!(
                        offset = line.start,
                        len = record.len(),
                        capacity = batch.capacity(),
                        "dropping record too large for any batch"
                    );
                    report.oversized += 1;
                }
                Ok(Some(record)) => {
                    if !batch.fits(&record) {
                        self.flush(&batch, &mut report)?;
                        committed = Cursor(boundary);
                        self.cursor_store.save(committed)?;
                        batch.reset();
                        log_progress(start, pending, boundary);
                    }
                    batch.push(&record)?;
                }
                Ok(None) => report.filtered += 1,
                Err(e) => {
                    warn!(offset = line.start, error = %e, "dropping malformed record");
                    report.malformed += 1;
                }
            }
            boundary = line.end;
        }

        if !batch.is_empty() {
            self.flush(&batch, &mut report)?;
            log_progress(start, pending, boundary);
        }

        let end = Cursor(boundary);
        if end != committed {
            self.cursor_store.save(end)?;
        }
        report.end = end;

        info!(
            cursor = end.offset(),
            batches = report.batches_sent,
            records = report.records_uploaded,
            filtered = report.filtered,
            malformed = report.malformed,
            "upload pass complete"
        );
        Ok(report)
    }

    /// Projector for the store's own header, or the built-in layout.
    fn projector_for<V: Volume>(&self, store: &LogStore<V>) -> RecordProjector {
        let header = store
            .read_from(0)
            .ok()
            .and_then(|mut lines| lines.next())
            .and_then(|line| line.ok())
            .and_then(|line| String::from_utf8(line.content().to_vec()).ok());

        match header.map(|h| RecordProjector::from_header(&h)) {
            Some(Ok(projector)) => projector,
            Some(Err(e)) => {
                warn!(error = %e, "unrecognised store header, using the default layout");
                RecordProjector::default()
            }
            None => RecordProjector::default(),
        }
    }

    /// Send `batch` until accepted or the retry policy gives up.
    fn flush(&mut self, batch: &UploadBatch, report: &mut PassReport) -> Result<()> {
        let Self {
            client,
            sleeper,
            config,
            ..
        } = self;
        let body = batch.body();
        let backoff = config.retry.backoff;

        debug!(records = batch.record_count(), bytes = body.len(), "flushing batch");
        let (attempts, outcome) = config.retry.run(
            sleeper,
            || client.send(body),
            DeliveryError::is_retryable,
            |attempt, err: &DeliveryError| {
                match err {
                    DeliveryError::Rejected { .. } => report.rejections += 1,
                    DeliveryError::ConnectionFailed { .. } => report.connection_failures += 1,
                    DeliveryError::RetriesExhausted { .. } => {}
                }
                warn!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "batch delivery failed");
            },
        );
        report.attempts += u64::from(attempts);

        match outcome {
            Ok(()) => {
                report.batches_sent += 1;
                report.records_uploaded += batch.record_count() as u64;
                Ok(())
            }
            Err(last) => {
                error!(attempts, error = %last, "giving up on batch");
                Err(DeliveryError::RetriesExhausted {
                    attempts,
                    last: Box::new(last),
                }
                .into())
            }
        }
    }
}

fn project_line(projector: &RecordProjector, line: &Line) -> Result<Option<String>> {
    let text = std::str::from_utf8(line.content()).map_err(|_| RecordError::NotUtf8)?;
    projector.project(text)
}

fn log_progress(start: Cursor, pending: u64, at: u64) {
    let done = at.saturating_sub(start.offset());
    let percent = if pending == 0 {
        100
    } else {
        (done * 100 / pending).min(100)
    };
    info!(percent, bytes = done, pending, "upload progress");
}
