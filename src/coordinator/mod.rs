// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] ties the components together:
//! - [`SyncLoader`] for bootstrap and forced rebuilds
//! - [`ConsistencyManager`] for drift checks and repair
//! - a scheduled consistency tick and a health verdict on top
//!
//! # Lifecycle
//!
//! ```text
//! Created → Bootstrapping → Ready → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use event_index_sync::{EngineState, SyncConfig, SyncEngine};
//! use event_index_sync::storage::memory::{InMemoryIndex, InMemoryRecordStore};
//!
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(InMemoryRecordStore::new()),
//!     Arc::new(InMemoryIndex::new()),
//! );
//! assert_eq!(engine.state(), EngineState::Created);
//! ```

mod lifecycle;
mod types;

pub use types::{EngineState, HealthCheck, HEALTH_SAMPLE_SIZE};

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::consistency::{CheckResult, ConsistencyManager, RepairReport};
use crate::error::SyncError;
use crate::indexing::BatchIndexer;
use crate::storage::redis::RedisIndexStore;
use crate::storage::sql::SqlRecordStore;
use crate::storage::traits::{IndexStore, RecordStore};
use crate::sync::{SyncLoader, SyncReport, SyncStatus};

/// Main sync engine coordinator.
///
/// `Send + Sync`; every entry point takes `&self` and may be called
/// concurrently (a health check next to an operator repair, for example).
pub struct SyncEngine {
    config: SyncConfig,
    records: Arc<dyn RecordStore>,
    indexer: BatchIndexer,
    loader: SyncLoader,
    consistency: ConsistencyManager,

    /// Engine state (broadcast to watchers)
    state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

impl SyncEngine {
    /// Create an engine over explicit collaborators.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to bootstrap the index and transition to `Ready`.
    pub fn new(config: SyncConfig, records: Arc<dyn RecordStore>, index: Arc<dyn IndexStore>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        let indexer = BatchIndexer::from_config(index, &config);
        let loader = SyncLoader::new(records.clone(), indexer.clone(), &config);
        let consistency = ConsistencyManager::new(records.clone(), indexer.clone(), &config);

        Self {
            config,
            records,
            indexer,
            loader,
            consistency,
            state: state_tx,
            state_rx,
        }
    }

    /// Connect the SQL record store and the Redis index from the configured URLs.
    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        let sql_url = config
            .record_store_url
            .clone()
            .ok_or_else(|| SyncError::Configuration("record_store_url is not set".into()))?;
        let redis_url = config
            .redis_url
            .clone()
            .ok_or_else(|| SyncError::Configuration("redis_url is not set".into()))?;

        let (records, index) = tokio::try_join!(
            SqlRecordStore::connect(&sql_url),
            RedisIndexStore::connect(&redis_url, &config.index_name, &config.index_key_prefix),
        )?;

        Ok(Self::new(config, Arc::new(records), Arc::new(index)))
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is ready to accept requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Running)
    }

    pub(super) fn set_state(&self, state: EngineState) {
        debug!(state = %state, "Engine state transition");
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(state.as_str());
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    #[must_use]
    pub fn indexer(&self) -> &BatchIndexer {
        &self.indexer
    }

    #[must_use]
    pub fn loader(&self) -> &SyncLoader {
        &self.loader
    }

    #[must_use]
    pub fn consistency(&self) -> &ConsistencyManager {
        &self.consistency
    }

    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        self.loader.bootstrap(cancel).await
    }

    pub async fn check_sync_status(&self, cancel: &CancellationToken) -> Result<SyncStatus, SyncError> {
        self.loader.check_sync_status(cancel).await
    }

    pub async fn force_sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        self.loader.force_sync(cancel).await
    }

    pub async fn check_consistency(&self, cancel: &CancellationToken) -> Result<Arc<CheckResult>, SyncError> {
        self.consistency.check_consistency(cancel).await
    }

    pub async fn check_event_consistency(
        &self,
        cancel: &CancellationToken,
        id: i64,
    ) -> Result<CheckResult, SyncError> {
        self.consistency.check_event_consistency(cancel, id).await
    }

    pub async fn repair_inconsistencies(
        &self,
        cancel: &CancellationToken,
        result: &CheckResult,
    ) -> Result<RepairReport, SyncError> {
        self.consistency.repair_inconsistencies(cancel, result).await
    }

    /// Health verdict for `/health`-style endpoints.
    ///
    /// Runs the cached consistency check under `health_check_timeout_ms`.
    /// Unhealthy when the check fails or times out, or when the drift
    /// problem count exceeds `max_inconsistencies`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let health = engine.health_check(&cancel).await;
    /// if health.healthy {
    ///     HttpResponse::Ok().json(&health)
    /// } else {
    ///     HttpResponse::ServiceUnavailable().json(&health)
    /// }
    /// ```
    pub async fn health_check(&self, cancel: &CancellationToken) -> HealthCheck {
        let _timer = crate::time_operation!("engine", "health_check");
        let start = std::time::Instant::now();
        let state = self.state();
        let max_allowed = self.config.max_inconsistencies;
        let timeout = self.config.health_check_timeout();

        // Child token so a timed-out check stops its retries
        let check_token = cancel.child_token();
        let outcome = tokio::time::timeout(timeout, self.consistency.check_consistency(&check_token)).await;
        check_token.cancel();
        let duration_ms = start.elapsed().as_millis() as u64;

        let health = match outcome {
            Ok(Ok(result)) => HealthCheck::from_result(state, &result, max_allowed, duration_ms),
            Ok(Err(e)) => {
                warn!(error = %e, "Consistency health check failed");
                HealthCheck::failed(state, max_allowed, duration_ms, e.to_string())
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Consistency health check timed out");
                HealthCheck::failed(
                    state,
                    max_allowed,
                    duration_ms,
                    format!("consistency check timed out after {:?}", timeout),
                )
            }
        };

        crate::metrics::set_healthy(health.healthy);
        health
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::record::{IndexDocument, Record};
    use crate::storage::memory::{InMemoryIndex, InMemoryRecordStore};
    use crate::storage::traits::StorageError;

    fn config() -> SyncConfig {
        SyncConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            retry_jitter: 0.0,
            ..Default::default()
        }
    }

    fn record(id: i64) -> Record {
        Record::new(id, format!("Event {}", id), 1)
    }

    /// Record store whose listing never completes.
    struct HangingRecords;

    #[async_trait]
    impl RecordStore for HangingRecords {
        async fn list_all(&self) -> Result<Vec<Record>, StorageError> {
            std::future::pending().await
        }

        async fn get_by_id(&self, id: i64) -> Result<Record, StorageError> {
            Err(StorageError::NotFound(id))
        }
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncEngine>();
    }

    #[tokio::test]
    async fn test_connect_requires_urls() {
        let err = SyncEngine::connect(SyncConfig::default()).await.err().unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_pass_throughs() {
        let store = Arc::new(InMemoryRecordStore::with_records((1..=4).map(record)));
        let index = Arc::new(InMemoryIndex::new());
        let engine = SyncEngine::new(config(), store, index.clone());
        let cancel = CancellationToken::new();

        let status = engine.check_sync_status(&cancel).await.unwrap();
        assert_eq!(status.difference, 4);

        engine.bootstrap(&cancel).await.unwrap();
        assert!(engine.check_sync_status(&cancel).await.unwrap().in_sync);

        index.seed(IndexDocument::from(&record(10)));
        let result = engine.check_consistency(&cancel).await.unwrap();
        assert_eq!(result.missing_in_record_store, vec![10]);
        assert_eq!(
            engine.check_event_consistency(&cancel, 10).await.unwrap().missing_in_record_store,
            vec![10]
        );

        let report = engine.repair_inconsistencies(&cancel, &result).await.unwrap();
        assert_eq!(report.deleted, 1);

        let forced = engine.force_sync(&cancel).await.unwrap();
        assert_eq!(forced.documents_indexed, 4);
        assert_eq!(index.stats().recreations, 1);
    }

    #[tokio::test]
    async fn test_health_check_threshold() {
        let store = Arc::new(InMemoryRecordStore::with_records((1..=7).map(record)));
        let index = Arc::new(InMemoryIndex::new());
        let engine = SyncEngine::new(
            SyncConfig { max_inconsistencies: 6, ..config() },
            store,
            index.clone(),
        );
        let cancel = CancellationToken::new();

        let health = engine.health_check(&cancel).await;
        assert!(!health.healthy);
        assert_eq!(health.total_problems, 7);
        assert_eq!(health.sample_missing_in_index, vec![1, 2, 3, 4, 5]);

        engine.force_sync(&cancel).await.unwrap();
        engine.consistency().refresh_consistency(&cancel).await.unwrap();
        let health = engine.health_check(&cancel).await;
        assert!(health.healthy);
        assert_eq!(health.is_consistent, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_times_out() {
        let engine = SyncEngine::new(
            SyncConfig { health_check_timeout_ms: 50, ..config() },
            Arc::new(HangingRecords),
            Arc::new(InMemoryIndex::new()),
        );

        let health = engine.health_check(&CancellationToken::new()).await;
        assert!(!health.healthy);
        assert!(health.error.unwrap().contains("timed out"));
        assert!(health.is_consistent.is_none());
    }
}
