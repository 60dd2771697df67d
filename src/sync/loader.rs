// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk loading of the index from the record store.
//!
//! # Bootstrap
//!
//! ```text
//! list records ──empty──▶ skip
//!      │
//! count index ──count > 0──▶ skip (someone already populated it)
//!      │ (count error: warn, keep going)
//!      ▼
//! chunk 1 ─▶ chunk 2 ─▶ ... ─▶ chunk N     each chunk retried on its own;
//!                                          a failed chunk does not stop the run
//!      │
//! 0 chunks succeeded ──▶ Err(BootstrapFailed)
//! otherwise          ──▶ Ok(report), failures logged with success rate
//! ```
//!
//! Force sync drops and recreates the index first, then runs the same loop.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

use super::types::{SkipReason, SyncKind, SyncReport, SyncStatus};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::indexing::{chunk_count, BatchIndexer};
use crate::metrics;
use crate::record::{now_millis, IndexDocument, Record};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{IndexStore, RecordStore};

pub struct SyncLoader {
    records: Arc<dyn RecordStore>,
    indexer: BatchIndexer,
    /// Policy for one whole chunk (wraps the indexer's own retries)
    chunk_retry: RetryConfig,
    /// Policy for store reads and index lifecycle calls
    op_retry: RetryConfig,
    chunk_size: usize,
}

impl SyncLoader {
    pub fn new(records: Arc<dyn RecordStore>, indexer: BatchIndexer, config: &SyncConfig) -> Self {
        Self {
            records,
            indexer,
            chunk_retry: config.chunk_retry_config(),
            op_retry: config.retry_config(),
            chunk_size: config.effective_chunk_size(),
        }
    }

    fn index(&self) -> &Arc<dyn IndexStore> {
        self.indexer.index()
    }

    /// Populate an empty index from the record store.
    ///
    /// Never overwrites an index that already reports documents.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let start = Instant::now();
        info!("Initializing search index from record store");

        let records = self.load_records(cancel).await?;
        let mut report = SyncReport::new(run_id, SyncKind::Bootstrap, records.len());

        if records.is_empty() {
            info!("No records found, skipping index initialization");
            return Ok(self.skip(report, SkipReason::NoRecords, start));
        }

        match self.existing_index_count(cancel).await {
            Ok(existing) if existing > 0 => {
                info!(existing, "Index already contains data, skipping bulk initialization");
                return Ok(self.skip(report, SkipReason::IndexPopulated { existing }, start));
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => return Err(self.cancelled(SyncKind::Bootstrap)),
            Err(e) => {
                warn!(error = %e, "Failed to check existing index data, proceeding with initialization");
            }
        }

        self.load_chunks(cancel, &records, &mut report).await?;
        self.finish(report, start)
    }

    /// Drop and recreate the index, then load every record into it.
    ///
    /// Destructive: only run on explicit operator request.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn force_sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let start = Instant::now();
        info!("Starting forced synchronization");

        let records = self.load_records(cancel).await?;
        let mut report = SyncReport::new(run_id, SyncKind::Force, records.len());
        info!(count = records.len(), "Retrieved records from record store");

        let index = self.index();
        retry("recreate_index", &self.op_retry, cancel, |_| async move {
            index
                .recreate_index()
                .await
                .map_err(|e| SyncError::storage("recreate index", e))
        })
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                self.cancelled(SyncKind::Force)
            } else {
                metrics::record_sync_run(SyncKind::Force.as_str(), "failed");
                e
            }
        })?;
        metrics::record_index_operation("recreate", true);

        if records.is_empty() {
            info!("No records to sync");
        } else {
            self.load_chunks(cancel, &records, &mut report).await?;
        }
        self.finish(report, start)
    }

    /// Count both stores concurrently. Read-only.
    pub async fn check_sync_status(&self, cancel: &CancellationToken) -> Result<SyncStatus, SyncError> {
        let records = &self.records;
        let index = self.index();

        let (record_count, index_count) = tokio::join!(
            retry("count_records", &self.op_retry, cancel, |_| async move {
                records
                    .count()
                    .await
                    .map_err(|e| SyncError::storage("count records", e))
            }),
            retry("count_documents", &self.op_retry, cancel, |_| async move {
                index
                    .count()
                    .await
                    .map_err(|e| SyncError::storage("count index documents", e))
            }),
        );

        let status = SyncStatus::new(record_count?, index_count?, now_millis());
        metrics::set_store_counts(status.record_count, status.index_count);
        Ok(status)
    }

    async fn load_records(&self, cancel: &CancellationToken) -> Result<Vec<Record>, SyncError> {
        let records = &self.records;
        retry("list_records", &self.op_retry, cancel, |_| async move {
            records
                .list_all()
                .await
                .map_err(|e| SyncError::storage("list records", e))
        })
        .await
    }

    async fn existing_index_count(&self, cancel: &CancellationToken) -> Result<u64, SyncError> {
        let index = self.index();
        retry("count_index", &self.op_retry, cancel, |_| async move {
            index
                .count()
                .await
                .map_err(|e| SyncError::storage("count index", e))
        })
        .await
    }

    async fn load_chunks(
        &self,
        cancel: &CancellationToken,
        records: &[Record],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let docs: Vec<IndexDocument> = records.iter().map(IndexDocument::from).collect();
        let total_chunks = chunk_count(docs.len(), self.chunk_size);
        report.chunks_total = total_chunks;

        for (chunk_no, chunk) in docs.chunks(self.chunk_size).enumerate() {
            info!(chunk = chunk_no + 1, total_chunks, chunk_size = chunk.len(), "Processing chunk");

            let indexer = &self.indexer;
            let result = retry("sync_chunk", &self.chunk_retry, cancel, |token| async move {
                indexer.index_chunk(&token, chunk_no, chunk).await
            })
            .await;

            match result {
                Ok(outcome) => {
                    report.chunks_succeeded += 1;
                    report.documents_indexed += outcome.indexed;
                    report.documents_rejected += outcome.rejected.len();
                }
                Err(e) if e.is_cancelled() => return Err(self.cancelled(report.kind)),
                Err(e) => {
                    error!(
                        chunk = chunk_no + 1,
                        chunk_size = chunk.len(),
                        error = %e,
                        "Failed to index chunk after retries"
                    );
                    report.chunks_failed += 1;
                    report.records_failed += chunk.len();
                }
            }
        }

        Ok(())
    }

    fn skip(&self, mut report: SyncReport, reason: SkipReason, start: Instant) -> SyncReport {
        report.skipped = Some(reason);
        report.duration = start.elapsed();
        metrics::record_sync_run(report.kind.as_str(), "skipped");
        report
    }

    fn cancelled(&self, kind: SyncKind) -> SyncError {
        metrics::record_sync_run(kind.as_str(), "cancelled");
        warn!(kind = %kind, "Sync run cancelled");
        SyncError::Cancelled
    }

    fn finish(&self, mut report: SyncReport, start: Instant) -> Result<SyncReport, SyncError> {
        report.duration = start.elapsed();
        let kind = report.kind.as_str();
        metrics::record_sync_duration(kind, report.duration);

        if report.chunks_total > 0 && report.chunks_succeeded == 0 {
            metrics::record_sync_run(kind, "failed");
            error!(
                total_records = report.total_records,
                failed_chunks = report.chunks_failed,
                "Failed to index any records"
            );
            return Err(SyncError::BootstrapFailed {
                total_records: report.total_records,
                failed_chunks: report.chunks_failed,
            });
        }

        if report.is_partial() {
            metrics::record_sync_run(kind, "partial");
            warn!(
                total_records = report.total_records,
                indexed = report.documents_indexed,
                rejected = report.documents_rejected,
                failed_chunks = report.chunks_failed,
                success_rate = %format!("{:.1}%", report.success_rate()),
                "Index load completed with errors"
            );
        } else {
            metrics::record_sync_run(kind, "success");
            info!(
                indexed = report.documents_indexed,
                chunks = report.chunks_total,
                duration_ms = report.duration.as_millis() as u64,
                "Index load completed successfully"
            );
        }

        Ok(report)
    }
}
