// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drift detection and repair between the record store and the index.
//!
//! A full check reads both stores completely, so its result is cached for a
//! short TTL. The cache lock is only held to read or swap the cached value,
//! never across I/O.
//!
//! Repair is one-directional: the record store is the truth, the index is
//! rebuilt from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::compare::{compare_record, diff, undecodable_mismatch};
use super::types::{CheckResult, RepairReport};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::indexing::BatchIndexer;
use crate::metrics;
use crate::record::{now_millis, IndexDocument, Record};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{IndexStore, RecordStore, SearchQuery};

/// Single-id index lookup.
enum Lookup {
    Found(IndexDocument),
    Undecodable,
    Absent,
}

/// Every entry read by a full index scan.
#[derive(Default)]
struct IndexScan {
    documents: Vec<IndexDocument>,
    undecodable: Vec<i64>,
    /// Total reported by the index
    total: u64,
}

struct CachedCheck {
    result: Arc<CheckResult>,
    computed_at: Instant,
}

pub struct ConsistencyManager {
    records: Arc<dyn RecordStore>,
    indexer: BatchIndexer,
    op_retry: RetryConfig,
    cache: RwLock<Option<CachedCheck>>,
    cache_ttl_ms: AtomicU64,
    page_size: usize,
    allow_orphan_deletes: bool,
}

impl ConsistencyManager {
    pub fn new(records: Arc<dyn RecordStore>, indexer: BatchIndexer, config: &SyncConfig) -> Self {
        Self {
            records,
            indexer,
            op_retry: config.retry_config(),
            cache: RwLock::new(None),
            cache_ttl_ms: AtomicU64::new(config.consistency_cache_ttl_ms),
            page_size: config.effective_page_size(),
            allow_orphan_deletes: config.allow_orphan_deletes,
        }
    }

    fn index(&self) -> &Arc<dyn IndexStore> {
        self.indexer.index()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.cache_ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    /// Last computed result regardless of age. No I/O.
    pub fn cached_result(&self) -> Option<Arc<CheckResult>> {
        self.cache.read().as_ref().map(|c| c.result.clone())
    }

    fn fresh_cached(&self) -> Option<Arc<CheckResult>> {
        let ttl = self.cache_ttl();
        self.cache
            .read()
            .as_ref()
            .filter(|c| c.computed_at.elapsed() <= ttl)
            .map(|c| c.result.clone())
    }

    /// Full comparison of both stores, served from cache while it is fresh.
    pub async fn check_consistency(&self, cancel: &CancellationToken) -> Result<Arc<CheckResult>, SyncError> {
        if let Some(cached) = self.fresh_cached() {
            metrics::record_consistency_check("full", "cache");
            debug!("Returning cached consistency check result");
            return Ok(cached);
        }
        self.refresh_consistency(cancel).await
    }

    /// Full comparison that ignores the cached value (and replaces it).
    #[instrument(skip_all)]
    pub async fn refresh_consistency(&self, cancel: &CancellationToken) -> Result<Arc<CheckResult>, SyncError> {
        info!("Starting consistency check");
        let start = Instant::now();
        let mut result = CheckResult::empty(now_millis());

        let (records, scan) = tokio::try_join!(self.load_records(cancel), self.scan_index(cancel))?;

        let d = diff(&records, &scan.documents, &scan.undecodable);
        result.total_records = records.len();
        result.total_documents = scan.total;
        result.missing_in_index = d.missing_in_index;
        result.missing_in_record_store = d.missing_in_record_store;
        result.mismatches = d.mismatches;
        result.settle();
        result.duration = start.elapsed();

        let result = Arc::new(result);
        *self.cache.write() = Some(CachedCheck {
            result: result.clone(),
            computed_at: Instant::now(),
        });

        metrics::record_consistency_check("full", "computed");
        metrics::record_consistency_duration(result.duration);
        metrics::set_drift(
            result.missing_in_index.len(),
            result.missing_in_record_store.len(),
            result.mismatches.len(),
        );
        info!(
            is_consistent = result.is_consistent,
            total_records = result.total_records,
            total_documents = result.total_documents,
            missing_in_index = result.missing_in_index.len(),
            missing_in_record_store = result.missing_in_record_store.len(),
            mismatches = result.mismatches.len(),
            duration_ms = result.duration.as_millis() as u64,
            "Consistency check completed"
        );

        Ok(result)
    }

    /// Compare a single id, bypassing the cache.
    pub async fn check_event_consistency(
        &self,
        cancel: &CancellationToken,
        id: i64,
    ) -> Result<CheckResult, SyncError> {
        debug!(id, "Checking consistency for single record");
        let start = Instant::now();
        let mut result = CheckResult::empty(now_millis());
        metrics::record_consistency_check("single", "computed");

        match self.fetch_record(cancel, id).await {
            Ok(record) => {
                result.total_records = 1;
                match self.fetch_document(cancel, id).await? {
                    Lookup::Found(doc) => {
                        result.total_documents = 1;
                        result.mismatches = compare_record(&record, &doc);
                    }
                    Lookup::Undecodable => {
                        result.total_documents = 1;
                        result.mismatches = vec![undecodable_mismatch(&record)];
                    }
                    Lookup::Absent => result.missing_in_index = vec![id],
                }
            }
            Err(e) if e.is_not_found() => {
                if !matches!(self.fetch_document(cancel, id).await?, Lookup::Absent) {
                    result.total_documents = 1;
                    result.missing_in_record_store = vec![id];
                }
            }
            Err(e) => return Err(e),
        }

        result.settle();
        result.duration = start.elapsed();
        Ok(result)
    }

    /// Bring the index in line with the record store for every problem in `result`.
    ///
    /// Every entity gets an attempt; failures are collected and reported
    /// together. Cancellation stops the pass immediately.
    #[instrument(skip_all)]
    pub async fn repair_inconsistencies(
        &self,
        cancel: &CancellationToken,
        result: &CheckResult,
    ) -> Result<RepairReport, SyncError> {
        let mut report = RepairReport::default();
        if result.is_consistent {
            info!("Data is consistent, no repair needed");
            return Ok(report);
        }

        info!(
            missing_in_index = result.missing_in_index.len(),
            missing_in_record_store = result.missing_in_record_store.len(),
            mismatches = result.mismatches.len(),
            "Starting data repair"
        );

        let mut failures: Vec<SyncError> = Vec::new();

        for &id in &result.missing_in_index {
            report.attempted += 1;
            match self.reindex(cancel, id).await {
                Ok(()) => {
                    report.indexed += 1;
                    metrics::record_repair_action("index", true);
                    info!(id, "Indexed missing document");
                }
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    metrics::record_repair_action("index", false);
                    error!(id, error = %e, "Failed to index missing document");
                    failures.push(e);
                }
            }
        }

        for &id in &result.missing_in_record_store {
            if !self.allow_orphan_deletes {
                report.orphans_skipped += 1;
                metrics::record_repair_action("skip", true);
                warn!(id, "Orphan document left in index, deletes disabled");
                continue;
            }

            report.attempted += 1;
            match self.indexer.delete_document(cancel, id).await {
                Ok(()) => {
                    report.deleted += 1;
                    metrics::record_repair_action("delete", true);
                    info!(id, "Removed orphan document from index");
                }
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    metrics::record_repair_action("delete", false);
                    error!(id, error = %e, "Failed to delete orphan document");
                    failures.push(e);
                }
            }
        }

        for id in result.mismatched_ids() {
            report.attempted += 1;
            match self.reindex(cancel, id).await {
                Ok(()) => {
                    report.reindexed += 1;
                    metrics::record_repair_action("reindex", true);
                    info!(id, "Re-indexed mismatched document");
                }
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    metrics::record_repair_action("reindex", false);
                    error!(id, error = %e, "Failed to re-index mismatched document");
                    failures.push(e);
                }
            }
        }

        if let Some(first) = failures.first() {
            return Err(SyncError::RepairIncomplete {
                failed: failures.len(),
                attempted: report.attempted,
                first_error: first.to_string(),
            });
        }

        info!(
            indexed = report.indexed,
            deleted = report.deleted,
            reindexed = report.reindexed,
            "Data repair completed successfully"
        );
        Ok(report)
    }

    /// Fetch the record and overwrite its document.
    async fn reindex(&self, cancel: &CancellationToken, id: i64) -> Result<(), SyncError> {
        let record = self.fetch_record(cancel, id).await?;
        self.indexer
            .index_document(cancel, &IndexDocument::from(&record))
            .await
    }

    async fn fetch_record(&self, cancel: &CancellationToken, id: i64) -> Result<Record, SyncError> {
        let records = &self.records;
        retry("get_record", &self.op_retry, cancel, |_| async move {
            records
                .get_by_id(id)
                .await
                .map_err(|e| SyncError::storage(format!("fetch record {}", id), e))
        })
        .await
    }

    async fn fetch_document(&self, cancel: &CancellationToken, id: i64) -> Result<Lookup, SyncError> {
        let index = self.index();
        let query = SearchQuery::by_id(id);
        let page = retry("get_document", &self.op_retry, cancel, |_| async move {
            index
                .search(&query)
                .await
                .map_err(|e| SyncError::storage(format!("fetch document {}", id), e))
        })
        .await?;

        if let Some(doc) = page.documents.into_iter().find(|doc| doc.id == id) {
            Ok(Lookup::Found(doc))
        } else if page.undecodable.contains(&id) {
            warn!(id, "Index entry could not be decoded");
            Ok(Lookup::Undecodable)
        } else {
            Ok(Lookup::Absent)
        }
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

    /// Read every index entry, page by page, until a short page or the
    /// reported total is reached.
    async fn scan_index(&self, cancel: &CancellationToken) -> Result<IndexScan, SyncError> {
        let index = self.index();
        let mut scan = IndexScan::default();
        let mut offset = 0usize;

        loop {
            let query = SearchQuery::page(offset, self.page_size);
            let page = retry("scan_index_page", &self.op_retry, cancel, |_| async move {
                index
                    .search(&query)
                    .await
                    .map_err(|e| SyncError::storage(format!("scan index at offset {}", query.offset), e))
            })
            .await?;

            let fetched = page.entries();
            if !page.undecodable.is_empty() {
                warn!(ids = ?page.undecodable, "Index entries could not be decoded");
            }
            scan.total = page.total;
            scan.documents.extend(page.documents);
            scan.undecodable.extend(page.undecodable);
            offset += fetched;

            if fetched < self.page_size || offset as u64 >= scan.total {
                debug!(
                    documents = scan.documents.len(),
                    undecodable = scan.undecodable.len(),
                    total = scan.total,
                    "Index scan finished"
                );
                return Ok(scan);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryIndex, InMemoryRecordStore};

    fn test_config() -> SyncConfig {
        SyncConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            retry_jitter: 0.0,
            ..Default::default()
        }
    }

    fn record(id: i64) -> Record {
        Record { price: 10.0, ..Record::new(id, format!("Event {}", id), 1) }
    }

    fn setup(
        record_ids: &[i64],
        doc_ids: &[i64],
        config: &SyncConfig,
    ) -> (Arc<InMemoryRecordStore>, Arc<InMemoryIndex>, ConsistencyManager) {
        let store = Arc::new(InMemoryRecordStore::with_records(record_ids.iter().map(|&id| record(id))));
        let index = Arc::new(InMemoryIndex::new());
        for &id in doc_ids {
            index.seed(IndexDocument::from(&record(id)));
        }
        let indexer = BatchIndexer::from_config(index.clone(), config);
        let manager = ConsistencyManager::new(store.clone(), indexer, config);
        (store, index, manager)
    }

    #[tokio::test]
    async fn test_detects_missing_on_both_sides() {
        let (_, _, manager) = setup(&[1, 2, 3], &[2, 3, 4], &test_config());
        let result = manager.check_consistency(&CancellationToken::new()).await.unwrap();

        assert!(!result.is_consistent);
        assert_eq!(result.missing_in_index, vec![1]);
        assert_eq!(result.missing_in_record_store, vec![4]);
        assert_eq!(result.total_records, 3);
        assert_eq!(result.total_documents, 3);
    }

    #[tokio::test]
    async fn test_scan_paginates_past_page_size() {
        let config = SyncConfig { consistency_page_size: 2, ..test_config() };
        let ids: Vec<i64> = (1..=7).collect();
        let (_, index, manager) = setup(&ids, &ids, &config);

        let result = manager.check_consistency(&CancellationToken::new()).await.unwrap();
        assert!(result.is_consistent);
        assert_eq!(result.total_documents, 7);
        assert_eq!(index.stats().searches, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_served_within_ttl_then_recomputed() {
        let (_, index, manager) = setup(&[1], &[1], &test_config());
        let cancel = CancellationToken::new();

        let first = manager.check_consistency(&cancel).await.unwrap();
        let second = manager.check_consistency(&cancel).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(index.stats().searches, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = manager.check_consistency(&cancel).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(index.stats().searches, 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache() {
        let (_, index, manager) = setup(&[1, 2], &[1], &test_config());
        let cancel = CancellationToken::new();

        let before = manager.check_consistency(&cancel).await.unwrap();
        index.seed(IndexDocument::from(&record(2)));
        let after = manager.refresh_consistency(&cancel).await.unwrap();

        assert!(!before.is_consistent);
        assert!(after.is_consistent);
        assert!(Arc::ptr_eq(&manager.cached_result().unwrap(), &after));
    }

    #[tokio::test]
    async fn test_single_event_checks() {
        let (store, _index, manager) = setup(&[1, 2], &[1, 3], &test_config());
        let cancel = CancellationToken::new();

        assert!(manager.check_event_consistency(&cancel, 1).await.unwrap().is_consistent);
        assert_eq!(manager.check_event_consistency(&cancel, 2).await.unwrap().missing_in_index, vec![2]);
        assert_eq!(
            manager.check_event_consistency(&cancel, 3).await.unwrap().missing_in_record_store,
            vec![3]
        );
        assert!(manager.check_event_consistency(&cancel, 99).await.unwrap().is_consistent);

        store.update(1, |r| r.location = "Moved".into());
        let result = manager.check_event_consistency(&cancel, 1).await.unwrap();
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].field, "location");
        assert!(manager.cached_result().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entries_are_drift_and_get_repaired() {
        let config = SyncConfig { consistency_page_size: 2, ..test_config() };
        let (_, index, manager) = setup(&[1, 2, 3], &[1, 3], &config);
        index.seed_undecodable(2);
        index.seed_undecodable(9);
        let cancel = CancellationToken::new();

        let result = manager.check_consistency(&cancel).await.unwrap();
        assert!(!result.is_consistent);
        assert_eq!(result.total_documents, 4);
        assert!(result.missing_in_index.is_empty());
        assert_eq!(result.missing_in_record_store, vec![9]);
        assert_eq!(result.mismatched_ids(), vec![2]);
        assert_eq!(result.mismatches[0].field, "document");
        assert_eq!(result.mismatches[0].index_value, "<undecodable>");

        let single = manager.check_event_consistency(&cancel, 2).await.unwrap();
        assert_eq!(single.mismatched_ids(), vec![2]);
        let orphan = manager.check_event_consistency(&cancel, 9).await.unwrap();
        assert_eq!(orphan.missing_in_record_store, vec![9]);

        let report = manager.repair_inconsistencies(&cancel, &result).await.unwrap();
        assert_eq!((report.deleted, report.reindexed), (1, 1));
        assert!(manager.refresh_consistency(&cancel).await.unwrap().is_consistent);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_repair_fixes_all_three_kinds() {
        let (store, index, manager) = setup(&[1, 2, 3], &[2, 3, 4], &test_config());
        store.update(3, |r| {
            r.name = "Renamed".into();
            r.price = 12.0;
        });
        let cancel = CancellationToken::new();

        let result = manager.check_consistency(&cancel).await.unwrap();
        assert_eq!(result.mismatched_ids(), vec![3]);

        let report = manager.repair_inconsistencies(&cancel, &result).await.unwrap();
        assert_eq!(report, RepairReport { attempted: 3, indexed: 1, deleted: 1, reindexed: 1, orphans_skipped: 0 });
        assert_eq!(index.stats().single_writes, 2);
        assert_eq!(index.stats().deletes, 1);

        assert!(manager.refresh_consistency(&cancel).await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn test_repair_keeps_orphans_when_deletes_disabled() {
        let config = SyncConfig { allow_orphan_deletes: false, ..test_config() };
        let (_, index, manager) = setup(&[1], &[1, 2], &config);
        let cancel = CancellationToken::new();

        let result = manager.check_consistency(&cancel).await.unwrap();
        let report = manager.repair_inconsistencies(&cancel, &result).await.unwrap();

        assert_eq!(report.orphans_skipped, 1);
        assert_eq!(report.attempted, 0);
        assert!(index.document(2).is_some());
    }

    #[tokio::test]
    async fn test_repair_continues_past_failures() {
        let (store, index, manager) = setup(&[1, 2, 3], &[], &test_config());
        let cancel = CancellationToken::new();
        let result = manager.check_consistency(&cancel).await.unwrap();

        // Record 2 disappears between check and repair; 3 is refused by the index
        store.remove(2);
        index.reject_id(3, "mapper_parsing_exception");

        let err = manager.repair_inconsistencies(&cancel, &result).await.unwrap_err();
        match err {
            SyncError::RepairIncomplete { failed, attempted, first_error } => {
                assert_eq!(failed, 2);
                assert_eq!(attempted, 3);
                assert!(first_error.contains("fetch record 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(index.document(1).is_some());
    }

    #[tokio::test]
    async fn test_repair_of_consistent_result_is_noop() {
        let (_, index, manager) = setup(&[1], &[1], &test_config());
        let cancel = CancellationToken::new();
        let result = manager.check_consistency(&cancel).await.unwrap();

        let report = manager.repair_inconsistencies(&cancel, &result).await.unwrap();
        assert_eq!(report, RepairReport::default());
        assert_eq!(index.stats().single_writes, 0);
    }
}
