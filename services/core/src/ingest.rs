//! Ingestion manager - writes normalized records into a store
//!
//! - Replace mode wipes the kind before inserting
//! - Rows go in fixed-size batches, one store transaction per batch
//! - A row the store rejects is logged and skipped; the run continues
//! - Anything else from the store aborts the run

use crate::error::EngineResult;
use crate::model::{RecordKind, Records, UploadMode};
use crate::normalize::{parse_upload, FileFormat};
use crate::store::{Batch, Store};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub kind: RecordKind,
    pub mode: UploadMode,
    /// Rows handed to the store.
    pub received: usize,
    /// Rows the store accepted.
    pub inserted: usize,
    /// Rows the store rejected and that were skipped.
    pub rejected: usize,
    /// Rows wiped before inserting (replace mode only).
    pub deleted: u64,
}

pub struct Ingestor<'a, S: Store + ?Sized> {
    store: &'a S,
    batch_size: usize,
}

impl<'a, S: Store + ?Sized> Ingestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Batch size is clamped to at least one row.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Write `records`, wiping the kind first in replace mode.
    pub async fn ingest(&self, records: &Records, mode: UploadMode) -> EngineResult<IngestReport> {
        let kind = records.kind();
        let deleted = if mode.is_replace() {
            let deleted = self.store.delete_all(kind).await?;
            info!(%kind, deleted, "replace mode: existing records wiped");
            deleted
        } else {
            0
        };

        let mut report = IngestReport {
            kind,
            mode,
            received: records.len(),
            inserted: 0,
            rejected: 0,
            deleted,
        };

        let batches: Vec<Batch<'_>> = match records {
            Records::Weight(rows) => rows.chunks(self.batch_size).map(Batch::Weight).collect(),
            Records::Loss(rows) => rows.chunks(self.batch_size).map(Batch::Loss).collect(),
        };

        for (batch_no, batch) in batches.into_iter().enumerate() {
            let outcome = self.store.write_batch(batch).await?;
            for rejected in &outcome.rejected {
                warn!(
                    %kind,
                    item_no = %rejected.item_no,
                    row = batch_no * self.batch_size + rejected.index + 1,
                    reason = %rejected.reason,
                    "row rejected by store, skipping"
                );
            }
            report.inserted += outcome.inserted;
            report.rejected += outcome.rejected.len();
            debug!(%kind, batch_no, size = batch.len(), inserted = outcome.inserted, "batch written");
        }

        info!(
            %kind,
            %mode,
            received = report.received,
            inserted = report.inserted,
            rejected = report.rejected,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Single entry point for uploaded files: decode, normalize, ingest.
    /// Input errors fail before anything is written or wiped.
    pub async fn ingest_content(
        &self,
        kind: RecordKind,
        content: &[u8],
        format: FileFormat,
        mode: UploadMode,
    ) -> EngineResult<IngestReport> {
        let records = parse_upload(kind, content, format)?;
        self.ingest(&records, mode).await
    }

    /// Wipe both kinds. Returns (weight rows, loss rows) removed.
    pub async fn clear_all(&self) -> EngineResult<(u64, u64)> {
        let loss = self.store.delete_all_loss().await?;
        let weight = self.store.delete_all_weight().await?;
        info!(weight, loss, "database cleared");
        Ok((weight, loss))
    }
}
