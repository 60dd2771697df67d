//! Integration Tests for the index sync engine
//!
//! Real backends: Redis Stack (RedisJSON + RediSearch) in a container, and a
//! SQLite file as the record store. Tests use testcontainers for portability;
//! no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//!
//! # Run only failure scenario tests
//! cargo test --test integration failure -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: bootstrap, drift check, repair, force sync
//! - `failure_*` - Failure scenarios: unreachable backends, missing configuration

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use event_index_sync::storage::redis::RedisIndexStore;
use event_index_sync::storage::sql::SqlRecordStore;
use event_index_sync::storage::traits::{BulkRequest, IndexStore, SearchQuery};
use event_index_sync::{EngineState, IndexDocument, Record, SyncConfig, SyncEngine, SyncError};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis Stack container (RedisJSON + RediSearch)
fn redis_stack_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis/redis-stack-server", "7.2.0-v10")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// SQLite database file that is removed on drop
struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new(name: &str) -> Self {
        let _ = std::fs::create_dir_all("temp");
        let path = PathBuf::from(format!("temp/integration_{}_{}.db", name, uuid::Uuid::new_v4()));
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = std::fs::remove_file(format!("{}-wal", self.path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", self.path.display()));
    }
}

fn event(id: i64) -> Record {
    Record {
        description: format!("Live set number {}", id),
        date: "2026-07-14".into(),
        time: "21:30".into(),
        location: "Riverside Stage".into(),
        price: 15.5,
        source: "integration".into(),
        ..Record::new(id, format!("Concert {}", id), 1)
    }
}

async fn seeded_store(db: &TempDb, count: i64) -> SqlRecordStore {
    let store = SqlRecordStore::connect(&db.url()).await.expect("Failed to connect SQLite");
    store.upsert_category(1, "Music").await.expect("Failed to insert category");
    for id in 1..=count {
        store.upsert(&event(id)).await.expect("Failed to insert record");
    }
    store
}

fn unique_index(name: &str) -> (String, String) {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    (format!("events_{}_{}", name, &suffix[..8]), format!("event:{}:{}:", name, &suffix[..8]))
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_engine_lifecycle_bootstrap_check_repair() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let redis_url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let db = TempDb::new("lifecycle");
    let store = Arc::new(seeded_store(&db, 42).await);
    let (index_name, prefix) = unique_index("lifecycle");
    let index = Arc::new(
        RedisIndexStore::connect(&redis_url, &index_name, &prefix)
            .await
            .expect("Failed to connect Redis Stack"),
    );

    let config = SyncConfig { chunk_size: 10, ..Default::default() };
    let engine = SyncEngine::new(config, store.clone(), index.clone());
    assert_eq!(engine.state(), EngineState::Created);

    let cancel = CancellationToken::new();
    let report = engine.start(&cancel).await.expect("Startup cancelled").expect("Bootstrap failed");
    assert!(engine.is_ready());
    assert_eq!(report.chunks_total, 5);
    assert_eq!(report.documents_indexed, 42);

    let status = engine.check_sync_status(&cancel).await.unwrap();
    assert!(status.in_sync, "status: {:?}", status);

    let result = engine.check_consistency(&cancel).await.unwrap();
    assert!(result.is_consistent, "drift: {:?}", result);
    assert_eq!(result.total_documents, 42);

    // Introduce drift on all three axes
    store.delete(3).await.unwrap();
    index.delete_one(7).await.unwrap();
    let mut stale = IndexDocument::from(&event(11));
    stale.price = 99.0;
    index.index_one(&stale).await.unwrap();

    let drift = engine.consistency().refresh_consistency(&cancel).await.unwrap();
    assert_eq!(drift.missing_in_index, vec![7]);
    assert_eq!(drift.missing_in_record_store, vec![3]);
    assert_eq!(drift.mismatched_ids(), vec![11]);
    assert_eq!(drift.mismatches[0].field, "price");

    let repair = engine.repair_inconsistencies(&cancel, &drift).await.unwrap();
    assert_eq!((repair.indexed, repair.deleted, repair.reindexed), (1, 1, 1));

    let fresh = engine.consistency().refresh_consistency(&cancel).await.unwrap();
    assert!(fresh.is_consistent, "drift after repair: {:?}", fresh);

    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::ShuttingDown);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_single_event_check_and_force_sync() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let redis_url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let db = TempDb::new("force");
    let store = Arc::new(seeded_store(&db, 12).await);
    let (index_name, prefix) = unique_index("force");
    let index = Arc::new(RedisIndexStore::connect(&redis_url, &index_name, &prefix).await.unwrap());
    let engine = SyncEngine::new(SyncConfig::default(), store.clone(), index.clone());
    let cancel = CancellationToken::new();

    // Nothing indexed yet
    let single = engine.check_event_consistency(&cancel, 5).await.unwrap();
    assert_eq!(single.missing_in_index, vec![5]);

    let report = engine.force_sync(&cancel).await.unwrap();
    assert_eq!(report.documents_indexed, 12);
    assert!(engine.check_event_consistency(&cancel, 5).await.unwrap().is_consistent);

    // A second force sync drops and reloads without duplicating anything
    index.index_one(&IndexDocument::from(&event(500))).await.unwrap();
    engine.force_sync(&cancel).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 12);
    assert!(index.get(500).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_scan_paginates_beyond_one_page() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let redis_url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let db = TempDb::new("paging");
    let store = Arc::new(seeded_store(&db, 35).await);
    let (index_name, prefix) = unique_index("paging");
    let index = Arc::new(RedisIndexStore::connect(&redis_url, &index_name, &prefix).await.unwrap());

    let config = SyncConfig { consistency_page_size: 8, ..Default::default() };
    let engine = SyncEngine::new(config, store, index);
    let cancel = CancellationToken::new();

    engine.bootstrap(&cancel).await.unwrap();
    let result = engine.check_consistency(&cancel).await.unwrap();
    assert!(result.is_consistent);
    assert_eq!(result.total_records, 35);
    assert_eq!(result.total_documents, 35);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_bulk_write_reports_refused_item() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let redis_url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let (index_name, prefix) = unique_index("refused");
    let index = RedisIndexStore::connect(&redis_url, &index_name, &prefix).await.unwrap();

    // A plain string under a document key makes JSON.SET fail with WRONGTYPE
    let mut conn = index.connection();
    redis::cmd("SET")
        .arg(format!("{}2", prefix))
        .arg("not json")
        .query_async::<()>(&mut conn)
        .await
        .unwrap();

    let docs: Vec<IndexDocument> = (1..=3).map(|id| IndexDocument::from(&event(id))).collect();
    let response = index.bulk_write(&BulkRequest::index_documents(&docs)).await.unwrap();

    assert_eq!(response.items.iter().map(|item| item.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(response.has_errors());
    assert!(response.items[0].is_success());
    assert!(!response.items[1].is_success());
    assert!(response.items[2].is_success());

    let stored = index.search(&SearchQuery::by_id(3)).await.unwrap();
    assert_eq!(stored.documents.len(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_undecodable_document_is_repaired() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let redis_url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let db = TempDb::new("undecodable");
    let store = Arc::new(seeded_store(&db, 4).await);
    let (index_name, prefix) = unique_index("undecodable");
    let index = Arc::new(RedisIndexStore::connect(&redis_url, &index_name, &prefix).await.unwrap());

    let engine = SyncEngine::new(SyncConfig::default(), store, index.clone());
    let cancel = CancellationToken::new();
    engine.bootstrap(&cancel).await.unwrap();

    let mut broken = serde_json::to_value(IndexDocument::from(&event(2))).unwrap();
    broken.as_object_mut().unwrap().remove("name_suggest");
    let mut conn = index.connection();
    redis::cmd("JSON.SET")
        .arg(format!("{}2", prefix))
        .arg("$")
        .arg(broken.to_string())
        .query_async::<()>(&mut conn)
        .await
        .unwrap();

    let drift = engine.consistency().refresh_consistency(&cancel).await.unwrap();
    assert_eq!(drift.total_documents, 4);
    assert_eq!(drift.mismatched_ids(), vec![2]);
    assert_eq!(drift.mismatches[0].field, "document");

    let repair = engine.repair_inconsistencies(&cancel, &drift).await.unwrap();
    assert_eq!(repair.reindexed, 1);

    let fresh = engine.consistency().refresh_consistency(&cancel).await.unwrap();
    assert!(fresh.is_consistent, "drift after repair: {:?}", fresh);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_connect_from_config() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);

    let db = TempDb::new("connect");
    drop(seeded_store(&db, 3).await);
    let (index_name, prefix) = unique_index("connect");

    let config = SyncConfig {
        record_store_url: Some(db.url()),
        redis_url: Some(format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379))),
        index_name,
        index_key_prefix: prefix,
        ..Default::default()
    };
    let engine = SyncEngine::connect(config).await.expect("Failed to connect");
    let cancel = CancellationToken::new();

    engine.start(&cancel).await.unwrap();
    let health = engine.health_check(&cancel).await;
    assert!(health.healthy, "health: {:?}", health);
    assert_eq!(health.total_records, 3);
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
#[ignore] // Slow: exhausts every startup retry attempt
async fn failure_redis_unreachable_at_connect() {
    let result = RedisIndexStore::connect("redis://127.0.0.1:1", "events", "event:").await;
    let err = result.err().expect("connect should fail");
    assert!(matches!(err, SyncError::RetriesExhausted { .. }), "got {err}");
}

#[tokio::test]
async fn failure_invalid_redis_url_is_configuration_error() {
    let result = RedisIndexStore::connect("not a url", "events", "event:").await;
    assert!(matches!(result.err(), Some(SyncError::Configuration(_))));
}

#[tokio::test]
async fn failure_connect_without_urls() {
    let err = SyncEngine::connect(SyncConfig::default()).await.err().unwrap();
    assert!(err.to_string().contains("record_store_url"));
}
