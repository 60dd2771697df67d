// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search index backed by Redis Stack (RedisJSON + RediSearch).
//!
//! Each [`IndexDocument`] is stored as a JSON document under `{prefix}{id}`:
//!
//! ```json
//! {
//!   "id": 42,
//!   "name": "Jazz Night",
//!   "category_id": 3,
//!   "price": 12.5,
//!   "name_suggest": {"input": ["Jazz Night"], "weight": 10}
//! }
//! ```
//!
//! and the RediSearch index covers the prefix ON JSON, so documents become
//! searchable as soon as they are written:
//!
//! ```text
//! FT.CREATE events ON JSON PREFIX 1 event: SCHEMA $.id AS id NUMERIC SORTABLE ...
//! FT.SEARCH events * SORTBY id ASC LIMIT 0 100
//! ```
//!
//! A bulk request is sent as one pipeline of `JSON.SET` commands. The pipeline
//! reply stops at the first refused command, so when the server refuses any
//! item the writes are replayed one by one (`JSON.SET` is idempotent) to
//! attribute an outcome to every item.
//!
//! Note: RediSearch caps `LIMIT offset` at its `MAXSEARCHRESULTS` setting
//! (10 000 by default). Deployments with larger indexes must raise it for full
//! consistency scans to reach every document.

use std::time::Instant;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client, Pipeline, RedisError, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::index_schema::IndexSchema;
use super::traits::{
    BulkAction, BulkItemResult, BulkRequest, BulkResponse, IndexStore, SearchPage, SearchQuery,
    StorageError,
};
use crate::error::SyncError;
use crate::metrics;
use crate::record::IndexDocument;
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisIndexStore {
    connection: ConnectionManager,
    schema: IndexSchema,
}

impl RedisIndexStore {
    /// Connect with startup-mode retry and make sure the index exists.
    pub async fn connect(
        connection_string: &str,
        index_name: &str,
        key_prefix: &str,
    ) -> Result<Self, SyncError> {
        let client = Client::open(connection_string).map_err(|e| {
            SyncError::Configuration(format!("invalid redis url: {}", e))
        })?;

        let cancel = CancellationToken::new();
        let connection = retry("redis_connect", &RetryConfig::startup(), &cancel, |_| {
            let client = client.clone();
            async move {
                ConnectionManager::new(client)
                    .await
                    .map_err(|e| SyncError::storage("redis_connect", map_redis_error(e)))
            }
        })
        .await?;

        let store = Self {
            connection,
            schema: IndexSchema::events(index_name, key_prefix),
        };
        store
            .ensure_index()
            .await
            .map_err(|e| SyncError::storage("redis_ensure_index", e))?;

        info!(index = %store.schema.name, prefix = %store.schema.prefix, "Search index connected");
        Ok(store)
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn index_name(&self) -> &str {
        &self.schema.name
    }

    #[inline]
    fn key(&self, id: i64) -> String {
        format!("{}{}", self.schema.prefix, id)
    }

    /// Create the index unless it already exists.
    pub async fn ensure_index(&self) -> Result<(), StorageError> {
        match self.ft_create().await {
            Ok(()) => Ok(()),
            Err(StorageError::Backend(msg)) if msg.to_lowercase().contains("already exists") => {
                debug!(index = %self.schema.name, "Search index already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ft_create(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let result = cmd("FT.CREATE")
            .arg(self.schema.to_ft_create_args())
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error);

        metrics::record_index_operation("create", result.is_ok());
        result
    }

    /// Drop the index together with its documents. Unknown index is not an error.
    async fn ft_dropindex(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let result = match cmd("FT.DROPINDEX")
            .arg(&self.schema.name)
            .arg("DD")
            .query_async::<()>(&mut conn)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_unknown_index(&e) => Ok(()),
            Err(e) => Err(map_redis_error(e)),
        };

        metrics::record_index_operation("drop", result.is_ok());
        result
    }

    async fn json_set(&self, key: &str, json: &str) -> Result<(), RedisError> {
        let mut conn = self.connection.clone();
        cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(json)
            .query_async::<()>(&mut conn)
            .await
    }

    /// Replay prepared writes one at a time to learn which items the server refuses.
    async fn write_each(
        &self,
        writes: &[PreparedWrite],
    ) -> Result<Vec<BulkItemResult>, StorageError> {
        let mut results = Vec::with_capacity(writes.len());
        for write in writes {
            match self.json_set(&write.key, &write.json).await {
                Ok(()) => results.push(BulkItemResult::ok(write.id)),
                Err(e) if is_transport_error(&e) => return Err(map_redis_error(e)),
                Err(e) => {
                    let kind = e.code().unwrap_or("redis_error").to_string();
                    results.push(BulkItemResult::failed(write.id, 400, kind, e.to_string()));
                }
            }
        }
        Ok(results)
    }
}

/// One bulk item ready for the wire.
#[derive(Debug, Clone, PartialEq)]
struct PreparedWrite {
    /// Position in the request
    position: usize,
    id: i64,
    key: String,
    json: String,
}

/// Serialize every item of `request`. Items that fail to serialize are
/// returned as failed results with their request position.
fn prepare_writes(
    prefix: &str,
    request: &BulkRequest,
) -> (Vec<PreparedWrite>, Vec<(usize, BulkItemResult)>) {
    let mut writes = Vec::with_capacity(request.len());
    let mut failed = Vec::new();

    for (position, item) in request.items.iter().enumerate() {
        let BulkAction::Index { id: key_id } = &item.action;
        let id = item.document.id;
        match serde_json::to_string(&item.document) {
            Ok(json) => writes.push(PreparedWrite {
                position,
                id,
                key: format!("{}{}", prefix, key_id),
                json,
            }),
            Err(e) => failed.push((
                position,
                BulkItemResult::failed(id, 400, "serialization_error", e.to_string()),
            )),
        }
    }

    (writes, failed)
}

/// `JSON.SET key $ doc` per write, replies discarded.
fn bulk_pipeline(writes: &[PreparedWrite]) -> Pipeline {
    let mut pipeline = pipe();
    for write in writes {
        pipeline.cmd("JSON.SET").arg(&write.key).arg("$").arg(&write.json).ignore();
    }
    pipeline
}

/// Transport-level failures abort a bulk request; anything else is per item.
fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn is_unknown_index(e: &RedisError) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("unknown index") || msg.contains("no such index")
}

fn map_redis_error(e: RedisError) -> StorageError {
    if is_transport_error(&e) {
        StorageError::Connection(e.to_string())
    } else {
        StorageError::Backend(e.to_string())
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        _ => None,
    }
}

/// Id of the document stored under `key`, if the key carries `prefix`.
fn id_from_key(key: &Value, prefix: &str) -> Option<i64> {
    value_to_string(key)?.strip_prefix(prefix)?.parse().ok()
}

/// Parse an `FT.SEARCH` reply: `[total, key, [field, value, ...], key, ...]`.
/// The document body is the `$` field of each entry.
///
/// An entry whose body is missing or does not decode is returned by the id in
/// its key, so one bad document never hides the rest of the page.
pub(crate) fn parse_search_reply(reply: Value, prefix: &str) -> Result<SearchPage, StorageError> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(StorageError::Serialization(format!(
                "unexpected FT.SEARCH reply: {:?}",
                other
            )))
        }
    };

    let mut iter = items.into_iter();
    let total = match iter.next() {
        Some(Value::Int(n)) => n.max(0) as u64,
        other => {
            return Err(StorageError::Serialization(format!(
                "FT.SEARCH reply has no total: {:?}",
                other
            )))
        }
    };

    let mut page = SearchPage { total, ..Default::default() };
    while let Some(key) = iter.next() {
        let body = match iter.next() {
            Some(Value::Array(fields)) => fields
                .chunks(2)
                .find(|pair| pair.first().and_then(value_to_string).as_deref() == Some("$"))
                .and_then(|pair| pair.get(1))
                .and_then(value_to_string),
            _ => None,
        };

        let reason = match body.as_deref().map(serde_json::from_str::<IndexDocument>) {
            Some(Ok(doc)) => {
                page.documents.push(doc);
                continue;
            }
            Some(Err(e)) => e.to_string(),
            None => "no document body".to_string(),
        };

        match id_from_key(&key, prefix) {
            Some(id) => {
                warn!(id, error = %reason, "Undecodable document in search reply");
                page.undecodable.push(id);
            }
            None => warn!(key = ?key, error = %reason, "Unrecognized entry in search reply"),
        }
    }

    Ok(page)
}

#[async_trait]
impl IndexStore for RedisIndexStore {
    async fn index_one(&self, doc: &IndexDocument) -> Result<(), StorageError> {
        let json = serde_json::to_string(doc)?;
        self.json_set(&self.key(doc.id), &json).await.map_err(map_redis_error)
    }

    async fn delete_one(&self, id: i64) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        cmd("DEL")
            .arg(self.key(id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, StorageError> {
        let start = Instant::now();
        let (writes, failed) = prepare_writes(&self.schema.prefix, request);
        let mut slots: Vec<Option<BulkItemResult>> = vec![None; request.len()];
        for (position, result) in failed {
            slots[position] = Some(result);
        }

        if !writes.is_empty() {
            let mut conn = self.connection.clone();
            let results = match bulk_pipeline(&writes).query_async::<()>(&mut conn).await {
                Ok(()) => writes.iter().map(|w| BulkItemResult::ok(w.id)).collect(),
                Err(e) if is_transport_error(&e) => return Err(map_redis_error(e)),
                Err(e) => {
                    debug!(
                        items = writes.len(),
                        error = %e,
                        "Bulk pipeline refused an item, resolving per item"
                    );
                    self.write_each(&writes).await?
                }
            };
            for (write, result) in writes.iter().zip(results) {
                slots[write.position] = Some(result);
            }
        }

        Ok(BulkResponse {
            took_ms: start.elapsed().as_millis() as u64,
            items: slots.into_iter().flatten().collect(),
        })
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StorageError> {
        let mut conn = self.connection.clone();

        if let Some(id) = query.id {
            let body: Option<String> = cmd("JSON.GET")
                .arg(self.key(id))
                .arg("$")
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            // JSON.GET with a path returns an array of matches
            let Some(body) = body else {
                return Ok(SearchPage::default());
            };
            let mut page = SearchPage { total: 1, ..Default::default() };
            match serde_json::from_str::<Vec<IndexDocument>>(&body) {
                Ok(documents) => page.documents = documents,
                Err(e) => {
                    warn!(id, error = %e, "Undecodable document");
                    page.undecodable.push(id);
                }
            }
            return Ok(page);
        }

        let mut search = cmd("FT.SEARCH");
        search.arg(&self.schema.name).arg("*");
        if query.size > 0 {
            search.arg("SORTBY").arg("id").arg("ASC");
        }
        search.arg("LIMIT").arg(query.offset).arg(query.size);

        let reply: Value = search.query_async(&mut conn).await.map_err(map_redis_error)?;
        parse_search_reply(reply, &self.schema.prefix)
    }

    async fn recreate_index(&self) -> Result<(), StorageError> {
        self.ft_dropindex().await?;
        self.ft_create().await?;
        info!(index = %self.schema.name, "Search index recreated");
        Ok(())
    }
}
