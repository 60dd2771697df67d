// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk indexing with a partial-failure policy.
//!
//! Documents are split into fixed-size chunks and submitted one chunk at a
//! time, in input order. Per chunk:
//!
//! | Outcome                      | Result                               |
//! |------------------------------|--------------------------------------|
//! | every item accepted          | `Ok`                                 |
//! | some items rejected          | `Ok`, rejections logged and counted  |
//! | every item rejected          | `Err(ChunkRejected)`                 |
//! | request failed (transport)   | retried, then `Err(RetriesExhausted)`|
//! | every item fails validation  | `Err(ChunkInvalid)`, not retried     |
//!
//! Documents that fail validation are never sent; they count as rejected
//! items of their chunk.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::record::IndexDocument;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{BulkRequest, BulkResponse, IndexStore};

/// Rejection samples carried in errors and logs
const MAX_REPORTED_REJECTIONS: usize = 5;

/// Number of chunks needed for `total` items at `size` per chunk.
#[must_use]
pub fn chunk_count(total: usize, size: usize) -> usize {
    total.div_ceil(size.max(1))
}

/// One document the index (or validation) refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub id: i64,
    pub reason: String,
}

/// Result of one accepted chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub chunk: usize,
    pub submitted: usize,
    pub indexed: usize,
    pub rejected: Vec<RejectedItem>,
}

impl ChunkOutcome {
    /// Accepted, but with at least one rejected item
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.rejected.is_empty()
    }
}

/// Totals of a [`BatchIndexer::bulk_index`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub chunks: usize,
    pub indexed: usize,
    pub rejected: usize,
}

impl BulkStats {
    pub fn absorb(&mut self, outcome: &ChunkOutcome) {
        self.chunks += 1;
        self.indexed += outcome.indexed;
        self.rejected += outcome.rejected.len();
    }
}

fn sample_reasons(rejected: &[RejectedItem]) -> String {
    rejected
        .iter()
        .take(MAX_REPORTED_REJECTIONS)
        .map(|r| format!("{}: {}", r.id, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Writes documents into the index through the retry policy.
#[derive(Clone)]
pub struct BatchIndexer {
    index: Arc<dyn IndexStore>,
    retry: RetryConfig,
    chunk_size: usize,
}

impl BatchIndexer {
    pub fn new(index: Arc<dyn IndexStore>, retry: RetryConfig, chunk_size: usize) -> Self {
        Self {
            index,
            retry,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(index: Arc<dyn IndexStore>, config: &SyncConfig) -> Self {
        Self::new(index, config.retry_config(), config.effective_chunk_size())
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn index(&self) -> &Arc<dyn IndexStore> {
        &self.index
    }

    /// Index `docs` chunk by chunk, stopping at the first chunk that fails.
    #[instrument(skip(self, cancel, docs), fields(documents = docs.len()))]
    pub async fn bulk_index(
        &self,
        cancel: &CancellationToken,
        docs: &[IndexDocument],
    ) -> Result<BulkStats, SyncError> {
        let mut stats = BulkStats::default();

        for (chunk_no, chunk) in docs.chunks(self.chunk_size).enumerate() {
            let first = chunk_no * self.chunk_size;
            let last = first + chunk.len() - 1;

            match self.index_chunk(cancel, chunk_no, chunk).await {
                Ok(outcome) => {
                    debug!(chunk = chunk_no, first, last, indexed = outcome.indexed, "Chunk processed");
                    stats.absorb(&outcome);
                }
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    return Err(SyncError::ChunkFailed {
                        first,
                        last,
                        source: Box::new(e),
                    })
                }
            }
        }

        Ok(stats)
    }

    /// Submit one chunk as a single bulk request.
    pub async fn index_chunk(
        &self,
        cancel: &CancellationToken,
        chunk_no: usize,
        docs: &[IndexDocument],
    ) -> Result<ChunkOutcome, SyncError> {
        let mut valid = Vec::with_capacity(docs.len());
        let mut invalid = Vec::new();
        for doc in docs {
            match doc.validate() {
                Ok(()) => valid.push(doc),
                Err(reason) => invalid.push(RejectedItem {
                    id: doc.id,
                    reason: format!("validation: {}", reason),
                }),
            }
        }

        metrics::record_chunk_size(docs.len());

        if valid.is_empty() {
            if invalid.is_empty() {
                return Ok(ChunkOutcome { chunk: chunk_no, ..Default::default() });
            }
            return Err(self.invalid_chunk(chunk_no, &invalid));
        }

        let request = BulkRequest::index_documents(valid);
        let response = retry("bulk_index_chunk", &self.retry, cancel, |_| {
            let request = &request;
            async move {
                let response = self.index.bulk_write(request).await.map_err(|e| {
                    SyncError::storage(format!("bulk write of chunk {}", chunk_no), e)
                })?;
                // A fully rejected request is retried as a whole
                if response.succeeded() == 0 && !response.items.is_empty() {
                    let rejected = rejected_items(&response);
                    return Err(SyncError::ChunkRejected {
                        chunk: chunk_no,
                        failed: rejected.len(),
                        reasons: sample_reasons(&rejected),
                    });
                }
                Ok(response)
            }
        })
        .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                if !e.is_cancelled() {
                    metrics::record_chunk("error");
                    error!(chunk = chunk_no, documents = docs.len(), error = %e, "Chunk failed");
                }
                return Err(e);
            }
        };

        let indexed = response.succeeded();
        let clean = invalid.is_empty() && !response.has_errors();
        let mut rejected = invalid;
        rejected.extend(rejected_items(&response));

        metrics::record_documents_indexed(indexed);
        if clean {
            metrics::record_chunk("success");
        } else {
            metrics::record_chunk("partial");
            metrics::record_documents_rejected(rejected.len());
            warn!(
                chunk = chunk_no,
                submitted = docs.len(),
                indexed,
                failed = rejected.len(),
                took_ms = response.took_ms,
                errors = %sample_reasons(&rejected),
                "Bulk operation completed with errors"
            );
        }

        Ok(ChunkOutcome {
            chunk: chunk_no,
            submitted: docs.len(),
            indexed,
            rejected,
        })
    }

    fn invalid_chunk(&self, chunk_no: usize, rejected: &[RejectedItem]) -> SyncError {
        metrics::record_chunk("invalid");
        metrics::record_documents_rejected(rejected.len());
        let reasons = sample_reasons(rejected);
        error!(chunk = chunk_no, failed = rejected.len(), errors = %reasons, "All documents in chunk failed validation");
        SyncError::ChunkInvalid {
            chunk: chunk_no,
            failed: rejected.len(),
            reasons,
        }
    }

    /// Create or overwrite a single document.
    pub async fn index_document(
        &self,
        cancel: &CancellationToken,
        doc: &IndexDocument,
    ) -> Result<(), SyncError> {
        doc.validate()
            .map_err(|reason| SyncError::Validation { id: doc.id, reason })?;

        retry("index_document", &self.retry, cancel, |_| async move {
            self.index
                .index_one(doc)
                .await
                .map_err(|e| SyncError::storage(format!("index document {}", doc.id), e))
        })
        .await?;

        metrics::record_documents_indexed(1);
        debug!(id = doc.id, "Document indexed");
        Ok(())
    }

    /// Delete a single document. Deleting an absent document succeeds.
    pub async fn delete_document(&self, cancel: &CancellationToken, id: i64) -> Result<(), SyncError> {
        retry("delete_document", &self.retry, cancel, |_| async move {
            self.index
                .delete_one(id)
                .await
                .map_err(|e| SyncError::storage(format!("delete document {}", id), e))
        })
        .await?;

        debug!(id, "Document deleted");
        Ok(())
    }
}

fn rejected_items(response: &BulkResponse) -> Vec<RejectedItem> {
    response
        .failures()
        .map(|item| RejectedItem {
            id: item.id,
            reason: match &item.error {
                Some(err) => format!("{} - {}", err.kind, err.reason),
                None => format!("status {}", item.status),
            },
        })
        .collect()
}
