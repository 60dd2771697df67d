// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;

/// One field that differs between a record and its index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    pub id: i64,
    pub field: String,
    pub record_value: String,
    pub index_value: String,
}

/// Outcome of comparing the record store with the index.
///
/// Drift is reported here, never as an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub is_consistent: bool,
    pub total_records: usize,
    /// Document total as reported by the index
    pub total_documents: u64,
    /// Ascending
    pub missing_in_index: Vec<i64>,
    /// Ascending
    pub missing_in_record_store: Vec<i64>,
    /// Ordered by id, then in comparison order
    pub mismatches: Vec<FieldMismatch>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Wall-clock time the check started (epoch millis)
    pub checked_at_ms: i64,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl CheckResult {
    pub(crate) fn empty(checked_at_ms: i64) -> Self {
        Self {
            is_consistent: true,
            total_records: 0,
            total_documents: 0,
            missing_in_index: Vec::new(),
            missing_in_record_store: Vec::new(),
            mismatches: Vec::new(),
            duration: Duration::ZERO,
            checked_at_ms,
        }
    }

    /// Recompute `is_consistent` from the three lists.
    pub(crate) fn settle(&mut self) {
        self.is_consistent = self.missing_in_index.is_empty()
            && self.missing_in_record_store.is_empty()
            && self.mismatches.is_empty();
    }

    /// Missing ids on either side plus field mismatches.
    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.missing_in_index.len() + self.missing_in_record_store.len() + self.mismatches.len()
    }

    /// Distinct ids with at least one mismatched field, ascending.
    #[must_use]
    pub fn mismatched_ids(&self) -> Vec<i64> {
        self.mismatches
            .iter()
            .map(|m| m.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// What a repair pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub attempted: usize,
    /// Missing documents written
    pub indexed: usize,
    /// Orphan documents removed
    pub deleted: usize,
    /// Mismatched documents overwritten
    pub reindexed: usize,
    /// Orphans left alone because deletes are disabled
    pub orphans_skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch(id: i64, field: &str) -> FieldMismatch {
        FieldMismatch {
            id,
            field: field.into(),
            record_value: "a".into(),
            index_value: "b".into(),
        }
    }

    #[test]
    fn test_problem_count_and_settle() {
        let mut result = CheckResult::empty(0);
        result.settle();
        assert!(result.is_consistent);
        assert_eq!(result.problem_count(), 0);

        result.missing_in_index = vec![1];
        result.mismatches = vec![mismatch(2, "name"), mismatch(2, "price")];
        result.settle();
        assert!(!result.is_consistent);
        assert_eq!(result.problem_count(), 3);
    }

    #[test]
    fn test_mismatched_ids_deduplicated() {
        let mut result = CheckResult::empty(0);
        result.mismatches = vec![mismatch(9, "name"), mismatch(3, "date"), mismatch(9, "price")];
        assert_eq!(result.mismatched_ids(), vec![3, 9]);
    }
}
