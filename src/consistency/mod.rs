// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consistency checking between the record store and the search index.
//!
//! - [`compare`]: pure set and field comparison of two snapshots
//! - [`manager`]: cached full checks, single-id checks and repair
//! - [`types`]: check results and repair reports

pub mod compare;
pub mod manager;
pub mod types;

pub use compare::{compare_record, diff, Diff};
pub use manager::ConsistencyManager;
pub use types::{CheckResult, FieldMismatch, RepairReport};
