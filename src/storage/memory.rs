// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory collaborators.
//!
//! Both stores are safe for concurrent use and count the writes they receive,
//! which makes them the workhorse for tests and local demos. [`InMemoryIndex`]
//! can also be told to reject specific ids (per-item bulk failures), to fail
//! the next N calls outright (transport failures), or to hold entries that
//! no longer decode as documents.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::record::{IndexDocument, Record};
use super::traits::{
    BulkItemResult, BulkRequest, BulkResponse, IndexStore, RecordStore, SearchPage, SearchQuery,
    StorageError,
};

pub struct InMemoryRecordStore {
    data: DashMap<i64, Record>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Build a store holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or replace a record
    pub fn insert(&self, record: Record) {
        self.data.insert(record.id, record);
    }

    pub fn remove(&self, id: i64) -> Option<Record> {
        self.data.remove(&id).map(|(_, record)| record)
    }

    /// Apply `f` to a stored record in place; returns false if absent.
    pub fn update(&self, id: i64, f: impl FnOnce(&mut Record)) -> bool {
        match self.data.get_mut(&id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list_all(&self) -> Result<Vec<Record>, StorageError> {
        let mut records: Vec<Record> = self.data.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn get_by_id(&self, id: i64) -> Result<Record, StorageError> {
        self.data
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StorageError::NotFound(id))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}

/// Snapshot of the writes an [`InMemoryIndex`] has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexWriteStats {
    pub bulk_requests: u64,
    pub bulk_items: u64,
    pub single_writes: u64,
    pub deletes: u64,
    pub recreations: u64,
    pub searches: u64,
}

pub struct InMemoryIndex {
    docs: DashMap<i64, IndexDocument>,
    /// Entries present in the index that do not decode
    undecodable: Mutex<BTreeSet<i64>>,
    /// Ids refused per item, with the reason reported back
    rejected: Mutex<HashMap<i64, String>>,
    /// Number of upcoming calls that fail before touching data
    fail_next: AtomicUsize,
    /// Bulk request id order, one entry per request
    bulk_log: Mutex<Vec<Vec<i64>>>,
    bulk_requests: AtomicU64,
    bulk_items: AtomicU64,
    single_writes: AtomicU64,
    deletes: AtomicU64,
    recreations: AtomicU64,
    searches: AtomicU64,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            undecodable: Mutex::new(BTreeSet::new()),
            rejected: Mutex::new(HashMap::new()),
            fail_next: AtomicUsize::new(0),
            bulk_log: Mutex::new(Vec::new()),
            bulk_requests: AtomicU64::new(0),
            bulk_items: AtomicU64::new(0),
            single_writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            recreations: AtomicU64::new(0),
            searches: AtomicU64::new(0),
        }
    }

    /// Place a document directly, bypassing write accounting.
    pub fn seed(&self, doc: IndexDocument) {
        self.docs.insert(doc.id, doc);
    }

    /// Place an entry under `id` that searches report as undecodable, as a
    /// document written by an incompatible version would be.
    /// A later write of `id` replaces it.
    pub fn seed_undecodable(&self, id: i64) {
        self.docs.remove(&id);
        self.undecodable.lock().insert(id);
    }

    /// Make every future write of `id` fail per item with `reason`.
    pub fn reject_id(&self, id: i64, reason: impl Into<String>) {
        self.rejected.lock().insert(id, reason.into());
    }

    /// Make the next `n` calls (any operation) fail with a connection error.
    pub fn fail_next_calls(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn document(&self, id: i64) -> Option<IndexDocument> {
        self.docs.get(&id).map(|d| d.value().clone())
    }

    /// Stored entries, decodable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len() + self.undecodable.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of each bulk request received, in arrival order.
    pub fn bulk_log(&self) -> Vec<Vec<i64>> {
        self.bulk_log.lock().clone()
    }

    pub fn stats(&self) -> IndexWriteStats {
        IndexWriteStats {
            bulk_requests: self.bulk_requests.load(Ordering::SeqCst),
            bulk_items: self.bulk_items.load(Ordering::SeqCst),
            single_writes: self.single_writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            recreations: self.recreations.load(Ordering::SeqCst),
            searches: self.searches.load(Ordering::SeqCst),
        }
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StorageError::Connection("injected index failure".into()))
        } else {
            Ok(())
        }
    }

    fn rejection(&self, id: i64) -> Option<String> {
        self.rejected.lock().get(&id).cloned()
    }

    fn store(&self, doc: &IndexDocument) {
        self.undecodable.lock().remove(&doc.id);
        self.docs.insert(doc.id, doc.clone());
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndex {
    async fn index_one(&self, doc: &IndexDocument) -> Result<(), StorageError> {
        self.maybe_fail()?;
        if let Some(reason) = self.rejection(doc.id) {
            return Err(StorageError::Backend(reason));
        }
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        self.store(doc);
        Ok(())
    }

    async fn delete_one(&self, id: i64) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.docs.remove(&id);
        self.undecodable.lock().remove(&id);
        Ok(())
    }

    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, StorageError> {
        self.maybe_fail()?;
        self.bulk_requests.fetch_add(1, Ordering::SeqCst);
        self.bulk_items.fetch_add(request.len() as u64, Ordering::SeqCst);
        self.bulk_log.lock().push(request.ids().collect());

        let items = request
            .items
            .iter()
            .map(|item| {
                let id = item.document.id;
                match self.rejection(id) {
                    Some(reason) => BulkItemResult::failed(id, 400, "document_rejected", reason),
                    None => {
                        self.store(&item.document);
                        BulkItemResult::ok(id)
                    }
                }
            })
            .collect();

        Ok(BulkResponse { took_ms: 0, items })
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StorageError> {
        self.maybe_fail()?;
        self.searches.fetch_add(1, Ordering::SeqCst);

        let undecodable = self.undecodable.lock().clone();

        if let Some(id) = query.id {
            if undecodable.contains(&id) {
                return Ok(SearchPage { documents: Vec::new(), undecodable: vec![id], total: 1 });
            }
            let documents: Vec<_> = self.document(id).into_iter().take(query.size).collect();
            let total = u64::from(self.docs.contains_key(&id));
            return Ok(SearchPage { documents, undecodable: Vec::new(), total });
        }

        let mut ids: Vec<i64> = self
            .docs
            .iter()
            .map(|d| *d.key())
            .chain(undecodable.iter().copied())
            .collect();
        ids.sort_unstable();
        let mut page = SearchPage { total: ids.len() as u64, ..Default::default() };

        for id in ids.into_iter().skip(query.offset).take(query.size) {
            match self.document(id) {
                Some(doc) => page.documents.push(doc),
                None if undecodable.contains(&id) => page.undecodable.push(id),
                None => {}
            }
        }

        Ok(page)
    }

    async fn recreate_index(&self) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.recreations.fetch_add(1, Ordering::SeqCst);
        self.docs.clear();
        self.undecodable.lock().clear();
        Ok(())
    }
}
