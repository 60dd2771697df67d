// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index loading: bootstrap, forced rebuild and store count comparison.

pub mod loader;
pub mod types;

pub use loader::SyncLoader;
pub use types::{SkipReason, SyncKind, SyncReport, SyncStatus};
