// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Values reported by the loader.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Which loader entry point produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Bootstrap,
    Force,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Bootstrap => "bootstrap",
            SyncKind::Force => "force",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a bootstrap did not write anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The record store is empty
    NoRecords,
    /// The index already reported a positive document count
    IndexPopulated { existing: u64 },
}

/// Outcome of a bootstrap or force sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub kind: SyncKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub total_records: usize,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    /// Documents the index accepted
    pub documents_indexed: usize,
    /// Documents rejected inside otherwise accepted chunks
    pub documents_rejected: usize,
    /// Records belonging to chunks that failed after retries
    pub records_failed: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl SyncReport {
    pub(crate) fn new(run_id: Uuid, kind: SyncKind, total_records: usize) -> Self {
        Self {
            run_id,
            kind,
            skipped: None,
            total_records,
            chunks_total: 0,
            chunks_succeeded: 0,
            chunks_failed: 0,
            documents_indexed: 0,
            documents_rejected: 0,
            records_failed: 0,
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Share of records that landed in a successful chunk, in percent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 100.0;
        }
        let succeeded = self.total_records.saturating_sub(self.records_failed);
        succeeded as f64 / self.total_records as f64 * 100.0
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.chunks_failed > 0 || self.documents_rejected > 0
    }
}

/// Entity counts of both stores at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub record_count: u64,
    pub index_count: u64,
    pub in_sync: bool,
    /// `record_count - index_count`
    pub difference: i64,
    pub checked_at_ms: i64,
}

impl SyncStatus {
    pub fn new(record_count: u64, index_count: u64, checked_at_ms: i64) -> Self {
        Self {
            record_count,
            index_count,
            in_sync: record_count == index_count,
            difference: record_count as i64 - index_count as i64,
            checked_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut report = SyncReport::new(Uuid::new_v4(), SyncKind::Bootstrap, 250);
        assert_eq!(report.success_rate(), 100.0);

        report.records_failed = 50;
        assert_eq!(report.success_rate(), 80.0);

        let empty = SyncReport::new(Uuid::new_v4(), SyncKind::Force, 0);
        assert_eq!(empty.success_rate(), 100.0);
    }

    #[test]
    fn test_status_difference_is_signed() {
        let behind = SyncStatus::new(10, 7, 0);
        assert!(!behind.in_sync);
        assert_eq!(behind.difference, 3);

        let ahead = SyncStatus::new(2, 5, 0);
        assert_eq!(ahead.difference, -3);

        assert!(SyncStatus::new(4, 4, 0).in_sync);
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = SyncReport::new(Uuid::nil(), SyncKind::Bootstrap, 3);
        report.skipped = Some(SkipReason::IndexPopulated { existing: 3 });
        report.duration = Duration::from_millis(1500);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "bootstrap");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["skipped"]["index_populated"]["existing"], 3);
    }
}
