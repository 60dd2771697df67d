// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic event-index-sync usage example.
//!
//! Demonstrates:
//! 1. Building an engine (in-memory stores, or SQL + Redis Stack when configured)
//! 2. Bootstrapping an empty index from the record store
//! 3. Introducing drift and detecting it with a consistency check
//! 4. Repairing the drift and verifying the result
//! 5. The health verdict and raw metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! # In-memory collaborators, no backends needed
//! cargo run --example basic_usage
//!
//! # Against real backends
//! EVENT_SYNC_DB_URL=sqlite://events.db?mode=rwc \
//! EVENT_SYNC_REDIS_URL=redis://localhost:6379 \
//!     cargo run --example basic_usage
//! ```

use std::sync::Arc;

use event_index_sync::storage::memory::{InMemoryIndex, InMemoryRecordStore};
use event_index_sync::storage::redis::RedisIndexStore;
use event_index_sync::storage::sql::SqlRecordStore;
use event_index_sync::{
    EngineState, IndexDocument, IndexStore, Record, RecordStore, SyncConfig, SyncEngine,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures every metric the engine emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    // Simple logging (no filter for simplicity)
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║          event-index-sync: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Collaborators and engine
    // ─────────────────────────────────────────────────────────────────────────
    let config = SyncConfig {
        chunk_size: 4,
        retry_base_delay_ms: 100,
        max_inconsistencies: 2,
        ..Default::default()
    };

    let events: Vec<Record> = [
        (1, "Jazz Night", "Blue Room", 25.0),
        (2, "Open Mic", "Corner Cafe", 0.0),
        (3, "Symphony No. 9", "Concert Hall", 60.0),
        (4, "Indie Showcase", "Warehouse 12", 18.5),
        (5, "Poetry Slam", "Library Annex", 5.0),
        (6, "Techno Marathon", "Dock 4", 35.0),
        (7, "Folk Evening", "Old Church", 12.0),
        (8, "Comedy Hour", "Basement Club", 15.0),
        (9, "Film Screening", "Rooftop", 8.0),
        (10, "Salsa Social", "Dance Studio", 10.0),
    ]
    .into_iter()
    .map(|(id, name, location, price)| Record {
        location: location.into(),
        price,
        date: "2026-11-20".into(),
        time: "20:00".into(),
        source: "demo".into(),
        ..Record::new(id, name, 1)
    })
    .collect();

    let (records, index) = match (
        std::env::var("EVENT_SYNC_DB_URL"),
        std::env::var("EVENT_SYNC_REDIS_URL"),
    ) {
        (Ok(db_url), Ok(redis_url)) => {
            println!("📦 Connecting to {} and {}...", db_url, redis_url);
            let store = SqlRecordStore::connect(&db_url).await?;
            store.upsert_category(1, "Music").await?;
            for event in &events {
                store.upsert(event).await?;
            }
            let index = RedisIndexStore::connect(&redis_url, &config.index_name, &config.index_key_prefix).await?;
            let store: Arc<dyn RecordStore> = Arc::new(store);
            let index: Arc<dyn IndexStore> = Arc::new(index);
            (store, index)
        }
        _ => {
            println!("📦 Using in-memory record store and index");
            let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::with_records(events.clone()));
            let index: Arc<dyn IndexStore> = Arc::new(InMemoryIndex::new());
            (store, index)
        }
    };

    let engine = SyncEngine::new(config, records, index.clone());
    let cancel = CancellationToken::new();
    println!("   State: {:?}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Bootstrap
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Starting engine (bootstrapping the index)...");
    match engine.start(&cancel).await? {
        Some(report) if report.was_skipped() => {
            println!("   └─ Skipped: {:?}", report.skipped);
        }
        Some(report) => {
            println!(
                "   └─ Indexed {} documents in {} chunks ({:.1}% success) in {:?}",
                report.documents_indexed,
                report.chunks_total,
                report.success_rate(),
                report.duration
            );
        }
        None => println!("   └─ Bootstrap failed, see logs"),
    }
    assert_eq!(engine.state(), EngineState::Ready);

    let status = engine.check_sync_status(&cancel).await?;
    println!(
        "   └─ Records: {}, documents: {}, in sync: {}",
        status.record_count, status.index_count, status.in_sync
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Drift
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧪 Introducing drift directly in the index...");
    index.delete_one(3).await?;
    let mut stale = IndexDocument::from(&events[5]);
    stale.price = 99.0;
    index.index_one(&stale).await?;
    index.index_one(&IndexDocument::from(&Record::new(404, "Ghost Gig", 1))).await?;

    let result = engine.consistency().refresh_consistency(&cancel).await?;
    println!("\n🔍 Consistency check:");
    println!("   └─ Consistent:               {}", result.is_consistent);
    println!("   └─ Missing in index:         {:?}", result.missing_in_index);
    println!("   └─ Missing in record store:  {:?}", result.missing_in_record_store);
    for mismatch in &result.mismatches {
        println!(
            "   └─ Mismatch: id={} {} record={} index={}",
            mismatch.id, mismatch.field, mismatch.record_value, mismatch.index_value
        );
    }

    let health = engine.health_check(&cancel).await;
    println!("\n🩺 Health: healthy={} problems={}/{}", health.healthy, health.total_problems, health.max_allowed);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Repair
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔧 Repairing...");
    let repair = engine.repair_inconsistencies(&cancel, &result).await?;
    println!(
        "   └─ indexed={} deleted={} reindexed={}",
        repair.indexed, repair.deleted, repair.reindexed
    );

    let fresh = engine.consistency().refresh_consistency(&cancel).await?;
    println!("   ✅ Consistent after repair: {}", fresh.is_consistent);

    let single = engine.check_event_consistency(&cancel, 6).await?;
    println!("   ✅ Event 6 consistent: {}", single.is_consistent);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind and sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    println!("   Counters:");
    for (name, labels, v) in &counters {
        println!("   └─ {}{} = {}", name, labels, v);
    }
    println!("   Gauges:");
    for (name, labels, v) in &gauges {
        println!("   └─ {}{} = {}", name, labels, v);
    }
    println!("   Histograms:");
    for (name, labels, count, sum) in &histograms {
        println!("   └─ {}{} count={} sum={:.4}", name, labels, count, sum);
    }
}
