// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

use serde::Serialize;

use crate::consistency::CheckResult;

/// How many ids of each missing list a health check carries.
pub const HEALTH_SAMPLE_SIZE: usize = 5;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Loading the index from the record store
    Bootstrapping,
    /// Ready to serve checks and repairs
    Ready,
    /// Scheduled consistency ticks running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Bootstrapping => "bootstrapping",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Bootstrapping => write!(f, "Bootstrapping"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Health verdict built from a (possibly cached) consistency check.
///
/// Suitable for a `/health` endpoint body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub state: EngineState,
    /// `None` when the check itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_consistent: Option<bool>,
    pub total_records: usize,
    pub total_documents: u64,
    pub missing_in_index: usize,
    pub missing_in_record_store: usize,
    pub mismatches: usize,
    pub total_problems: usize,
    pub max_allowed: usize,
    /// At most [`HEALTH_SAMPLE_SIZE`] ids
    pub sample_missing_in_index: Vec<i64>,
    /// At most [`HEALTH_SAMPLE_SIZE`] ids
    pub sample_missing_in_record_store: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at_ms: Option<i64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheck {
    pub(super) fn from_result(
        state: EngineState,
        result: &CheckResult,
        max_allowed: usize,
        duration_ms: u64,
    ) -> Self {
        let total_problems = result.problem_count();
        let healthy = total_problems <= max_allowed;

        Self {
            healthy,
            state,
            is_consistent: Some(result.is_consistent),
            total_records: result.total_records,
            total_documents: result.total_documents,
            missing_in_index: result.missing_in_index.len(),
            missing_in_record_store: result.missing_in_record_store.len(),
            mismatches: result.mismatches.len(),
            total_problems,
            max_allowed,
            sample_missing_in_index: sample(&result.missing_in_index),
            sample_missing_in_record_store: sample(&result.missing_in_record_store),
            checked_at_ms: Some(result.checked_at_ms),
            duration_ms,
            error: (!healthy).then(|| "too many consistency issues".to_string()),
        }
    }

    pub(super) fn failed(state: EngineState, max_allowed: usize, duration_ms: u64, error: String) -> Self {
        Self {
            healthy: false,
            state,
            is_consistent: None,
            total_records: 0,
            total_documents: 0,
            missing_in_index: 0,
            missing_in_record_store: 0,
            mismatches: 0,
            total_problems: 0,
            max_allowed,
            sample_missing_in_index: Vec::new(),
            sample_missing_in_record_store: Vec::new(),
            checked_at_ms: None,
            duration_ms,
            error: Some(error),
        }
    }
}

fn sample(ids: &[i64]) -> Vec<i64> {
    ids.iter().take(HEALTH_SAMPLE_SIZE).copied().collect()
}
