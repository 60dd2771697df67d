// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine-level error taxonomy.
//!
//! Collaborator failures arrive as [`StorageError`] and are wrapped with the
//! operation that hit them, so a final message reads like a path:
//!
//! ```text
//! index_chunk failed after 3 attempts: bulk write of chunk 4: Connection error: refused
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// A single attempt exceeded its own deadline
    #[error("attempt timed out after {0:?}")]
    AttemptTimedOut(Duration),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    /// Every item of a bulk chunk was rejected
    #[error("all {failed} items in chunk {chunk} were rejected: {reasons}")]
    ChunkRejected {
        chunk: usize,
        failed: usize,
        reasons: String,
    },

    /// Every item of a chunk failed validation, so nothing was sent
    #[error("all {failed} items in chunk {chunk} failed validation: {reasons}")]
    ChunkInvalid {
        chunk: usize,
        failed: usize,
        reasons: String,
    },

    /// A chunk failed after retries; the range is document positions in the input
    #[error("failed to process documents {first}-{last}: {source}")]
    ChunkFailed {
        first: usize,
        last: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("document {id} is not indexable: {reason}")]
    Validation { id: i64, reason: String },

    #[error("failed to index any of {total_records} records: {failed_chunks} chunk(s) failed")]
    BootstrapFailed {
        total_records: usize,
        failed_chunks: usize,
    },

    #[error("repair completed with {failed} error(s) out of {attempted} actions; first: {first_error}")]
    RepairIncomplete {
        failed: usize,
        attempted: usize,
        first_error: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Wrap a collaborator error with the operation that produced it.
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        SyncError::Storage {
            context: context.into(),
            source,
        }
    }

    /// True if this error (or an error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::RetriesExhausted { source, .. } | SyncError::ChunkFailed { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// True if the record store reported the entity as absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Storage { source, .. } => matches!(source, StorageError::NotFound(_)),
            SyncError::RetriesExhausted { source, .. } | SyncError::ChunkFailed { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Undecodable data and validation failures are deterministic, so they
    /// are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !(self.is_cancelled()
            || self.is_not_found()
            || matches!(
                self,
                SyncError::Validation { .. }
                    | SyncError::ChunkInvalid { .. }
                    | SyncError::Configuration(_)
                    | SyncError::Storage { source: StorageError::Serialization(_), .. }
            ))
    }
}
