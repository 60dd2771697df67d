// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: start, run loop, shutdown.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consistency::RepairReport;
use crate::error::SyncError;
use crate::sync::SyncReport;

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Start the engine: bootstrap the index, then become `Ready`.
    ///
    /// A failed bootstrap is logged and the engine still becomes `Ready`, so
    /// checks and repairs stay available. Only cancellation is returned as
    /// an error. Returns the bootstrap report when one completed.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self, cancel: &CancellationToken) -> Result<Option<SyncReport>, SyncError> {
        let startup_start = std::time::Instant::now();
        info!("Starting sync engine...");
        self.set_state(EngineState::Bootstrapping);

        let report = match self.loader.bootstrap(cancel).await {
            Ok(report) => Some(report),
            Err(e) if e.is_cancelled() => {
                warn!("Startup cancelled during bootstrap");
                self.set_state(EngineState::Created);
                return Err(SyncError::Cancelled);
            }
            Err(e) => {
                error!(error = %e, "Bootstrap failed, continuing without a loaded index");
                None
            }
        };

        self.set_state(EngineState::Ready);
        crate::metrics::record_latency("engine", "startup", startup_start.elapsed());
        info!(
            bootstrapped = report.as_ref().is_some_and(|r| !r.was_skipped()),
            duration_ms = startup_start.elapsed().as_millis() as u64,
            "Sync engine ready"
        );
        Ok(report)
    }

    /// One scheduled consistency pass.
    ///
    /// Always recomputes. With `auto_repair` on, detected drift is repaired
    /// and the cache refreshed afterwards. Returns the repair report if a
    /// repair ran.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Option<RepairReport>, SyncError> {
        let result = self.consistency.refresh_consistency(cancel).await?;
        if result.is_consistent {
            debug!("Scheduled consistency check found no drift");
            return Ok(None);
        }

        if !self.config.auto_repair {
            warn!(problems = result.problem_count(), "Drift detected, auto repair disabled");
            return Ok(None);
        }

        let report = self.consistency.repair_inconsistencies(cancel, &result).await?;
        self.consistency.refresh_consistency(cancel).await?;
        Ok(Some(report))
    }

    /// Run scheduled consistency ticks until `cancel` fires, then shut down.
    ///
    /// With `consistency_interval_secs = 0` no ticks are scheduled and this
    /// only waits for cancellation.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, cancel: &CancellationToken) {
        self.set_state(EngineState::Running);
        info!(
            interval_secs = self.config.consistency_interval_secs,
            auto_repair = self.config.auto_repair,
            "Sync engine running"
        );

        if self.config.consistency_interval_secs == 0 {
            cancel.cancelled().await;
        } else {
            let period = Duration::from_secs(self.config.consistency_interval_secs);
            let mut consistency_interval = interval_at(Instant::now() + period, period);
            consistency_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = consistency_interval.tick() => {
                        match self.tick(cancel).await {
                            Ok(Some(report)) => info!(
                                indexed = report.indexed,
                                deleted = report.deleted,
                                reindexed = report.reindexed,
                                "Scheduled repair completed"
                            ),
                            Ok(None) => {}
                            Err(e) if e.is_cancelled() => break,
                            Err(e) => warn!(error = %e, "Scheduled consistency tick failed"),
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Initiate graceful shutdown.
    ///
    /// Nothing is buffered in the engine, so this only moves the state.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating sync engine shutdown...");
        self.set_state(EngineState::ShuttingDown);
        info!("Sync engine shutdown complete");
    }
}
