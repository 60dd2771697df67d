// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator seams: the record store (ground truth) and the search index.
//!
//! Requests and responses crossing the index boundary are typed structs; the
//! wire encoding (a command pipeline of RedisJSON writes) happens inside the
//! implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{IndexDocument, Record};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Entity {0} not found")]
    NotFound(i64),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Action half of a bulk unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    /// Create or overwrite the document stored under `id`
    Index { id: String },
}

/// One action + document pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub action: BulkAction,
    pub document: IndexDocument,
}

/// A bulk write request. Items keep the order they were added in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequest {
    pub items: Vec<BulkItem>,
}

impl BulkRequest {
    /// Build an index request for `documents`, keyed by record id.
    pub fn index_documents<'a>(documents: impl IntoIterator<Item = &'a IndexDocument>) -> Self {
        let items = documents
            .into_iter()
            .map(|doc| BulkItem {
                action: BulkAction::Index { id: doc.id.to_string() },
                document: doc.clone(),
            })
            .collect();
        Self { items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record ids in submission order.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.items.iter().map(|item| item.document.id)
    }
}

/// Why the index refused one bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub kind: String,
    pub reason: String,
}

/// Per-item outcome of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub id: i64,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

impl BulkItemResult {
    pub fn ok(id: i64) -> Self {
        Self { id, status: 201, error: None }
    }

    pub fn failed(id: i64, status: u16, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id,
            status,
            error: Some(BulkItemError { kind: kind.into(), reason: reason.into() }),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Response to a [`BulkRequest`], one result per submitted item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| !item.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|item| !item.is_success())
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }
}

/// A page request against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchQuery {
    /// Restrict to a single document id
    pub id: Option<i64>,
    pub offset: usize,
    /// Zero means "count only"
    pub size: usize,
}

impl SearchQuery {
    /// Zero-size query: only the total is wanted.
    #[must_use]
    pub fn count_only() -> Self {
        Self { id: None, offset: 0, size: 0 }
    }

    #[must_use]
    pub fn page(offset: usize, size: usize) -> Self {
        Self { id: None, offset, size }
    }

    #[must_use]
    pub fn by_id(id: i64) -> Self {
        Self { id: Some(id), offset: 0, size: 1 }
    }
}

/// One page of documents plus the index-reported total for the query.
///
/// Entries the index holds but that no longer decode as an [`IndexDocument`]
/// are returned by id in `undecodable` instead of failing the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub documents: Vec<IndexDocument>,
    pub undecodable: Vec<i64>,
    pub total: u64,
}

impl SearchPage {
    /// Entries on this page, decodable or not.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.documents.len() + self.undecodable.len()
    }
}

/// The authoritative relational store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record, ordered by id.
    async fn list_all(&self) -> Result<Vec<Record>, StorageError>;

    /// A single record; `StorageError::NotFound` if absent.
    async fn get_by_id(&self, id: i64) -> Result<Record, StorageError>;

    /// Number of records.
    /// Default implementation counts a full listing.
    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.list_all().await?.len() as u64)
    }
}

/// The denormalized search index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create or fully overwrite one document.
    async fn index_one(&self, doc: &IndexDocument) -> Result<(), StorageError>;

    /// Remove one document. Removing an absent document is not an error.
    async fn delete_one(&self, id: i64) -> Result<(), StorageError>;

    /// Submit a bulk request. Per-item failures are reported in the response;
    /// `Err` means the request as a whole did not go through.
    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, StorageError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StorageError>;

    /// Total documents in the index.
    /// Default implementation issues a zero-size search.
    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.search(&SearchQuery::count_only()).await?.total)
    }

    /// Fetch a single document by id.
    async fn get(&self, id: i64) -> Result<Option<IndexDocument>, StorageError> {
        let page = self.search(&SearchQuery::by_id(id)).await?;
        Ok(page.documents.into_iter().find(|doc| doc.id == id))
    }

    /// Drop the index (and its documents) and create it again with its schema.
    async fn recreate_index(&self) -> Result<(), StorageError>;
}
