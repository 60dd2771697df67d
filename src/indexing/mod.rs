// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index writes: chunked bulk indexing and single-document operations.

pub mod bulk;

pub use bulk::{chunk_count, BatchIndexer, BulkStats, ChunkOutcome, RejectedItem};
