//! Initial synchronization: copy every existing document into the search index.
use crate::projector::Projector;
use crate::search::BulkResponse;
use crate::shutdown::ShutdownListener;
use crate::store::DocumentStore;
use crate::{Result, SyncError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default number of documents per bulk request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// documents read from the store.
    pub scanned: usize,
    /// documents the index acknowledged.
    pub synced: usize,
    /// bulk requests which failed as a whole.
    pub failed_batches: usize,
    /// single documents rejected inside otherwise good bulk requests.
    pub failed_items: usize,
    /// documents which couldn't be projected at all (no `_id`).
    pub skipped: usize,
    /// run stopped early because of shutdown.
    pub interrupted: bool,
}

/// Bulk loads the store snapshot into the search index.
///
/// Re-running is always safe, because each action is an upsert keyed by id.
pub struct Backfiller {
    store: Arc<dyn DocumentStore>,
    projector: Projector,
    shutdown: Option<ShutdownListener>,
}

impl Backfiller {
    pub fn new(store: Arc<dyn DocumentStore>, projector: Projector) -> Self {
        Backfiller {
            store,
            projector,
            shutdown: None,
        }
    }

    /// Stop before the next batch once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().map_or(false, ShutdownListener::is_shutdown)
    }

    /// Sync all documents in batches of `batch_size`, returns how many were synced.
    pub fn run(&self, batch_size: usize) -> Result<usize> {
        self.run_with_report(batch_size).map(|report| report.synced)
    }

    /// Like [run](Backfiller::run), but returns every counter.
    ///
    /// Only a failure to read the store aborts the run, index side failures are logged and
    /// the affected documents are left for the change stream or a future backfill.
    pub fn run_with_report(&self, batch_size: usize) -> Result<BackfillReport> {
        let batch_size = batch_size.max(1);
        let cursor_batch = u32::try_from(batch_size).map_err(|_| {
            SyncError::InvalidConfig(format!("batch size {} is too large", batch_size))
        })?;
        let mut report = BackfillReport::default();
        let mut buffer: Vec<(String, Value)> = Vec::with_capacity(batch_size);

        info!(index = %self.projector.index_name(), batch_size, "Backfill: begin to sync documents");
        let cursor = self.store.scan(cursor_batch)?;
        for doc in cursor {
            if buffer.is_empty() && self.stopping() {
                report.interrupted = true;
                warn!(synced = report.synced, "Backfill: shutdown requested, stop before next batch");
                break;
            }
            let doc = doc?;
            report.scanned += 1;
            match self.projector.prepare(&doc) {
                Ok(item) => buffer.push(item),
                Err(err) => {
                    warn!(?err, "Backfill: document can't be projected, skipped");
                    report.skipped += 1;
                }
            }
            if buffer.len() == batch_size {
                let mut data_to_write = Vec::with_capacity(batch_size);
                std::mem::swap(&mut buffer, &mut data_to_write);
                self.flush(data_to_write, &mut report);
            }
        }
        if !buffer.is_empty() {
            self.flush(buffer, &mut report);
        }

        info!(
            synced = report.synced,
            scanned = report.scanned,
            failed_batches = report.failed_batches,
            failed_items = report.failed_items,
            skipped = report.skipped,
            interrupted = report.interrupted,
            "Backfill: complete"
        );
        Ok(report)
    }

    fn flush(&self, batch: Vec<(String, Value)>, report: &mut BackfillReport) {
        let index = self.projector.index_name();
        let batch_len = batch.len();
        match self.projector.search_index().bulk_index(index, &batch) {
            Ok(resp) => {
                log_item_errors(&resp);
                report.failed_items += resp.failed.len();
                report.synced += resp.succeeded();
                info!(synced = report.synced, batch = batch_len, "Backfill: progress");
            }
            Err(err) => {
                report.failed_batches += 1;
                let first_id = batch.first().map(|(id, _)| id.as_str()).unwrap_or_default();
                error!(?err, batch = batch_len, %first_id, "Backfill: bulk request failed, batch skipped");
            }
        }
    }
}

fn log_item_errors(resp: &BulkResponse) {
    for item in resp.failed.iter() {
        error!(id = %item.id, status = item.status, reason = %item.reason, "Backfill: document index failed");
    }
}
