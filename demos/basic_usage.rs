// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic birch-offline usage example.
//!
//! Demonstrates:
//! 1. Opening the offline manager on a local SQLite file
//! 2. Caching data fetched from the remote
//! 3. Editing while offline and syncing on reconnect
//! 4. A conflict surfaced by the remote and resolved by the app
//! 5. Cache and sync statistics
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use birch_offline::{
    ConflictAction, ConflictResolution, EntityPayload, EntityType, ManagerState, OfflineConfig, OfflineManager, QueueItemDraft,
    RemoteFn, RemoteRequest, SyncConfig, SyncError, SyncEventKind, SyncOperation, SyncPriority, SyncStrategy,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

const DB_PATH: &str = "./birch_demo.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           birch-offline: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and initialize
    // ─────────────────────────────────────────────────────────────────────────
    let config = OfflineConfig {
        database_path: Some(DB_PATH.into()),
        sync: SyncConfig {
            retry_delay_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };

    // Stand-in remote: menus edited elsewhere conflict unless we ask to overwrite
    let remote = Arc::new(RemoteFn(|req: RemoteRequest| async move {
        if req.entity_type == EntityType::Menu && req.conflict_resolution == ConflictResolution::Manual {
            Err(SyncError::Conflict("menu was edited on another device".into()))
        } else {
            Ok(req.payload)
        }
    }));

    let manager = OfflineManager::new(config, remote)?;
    println!("   State: {}", manager.state());
    manager.initialize().await?;
    assert_eq!(manager.state(), ManagerState::Running);
    println!("   ✅ Ready on {:?} backend", manager.store().backend_kind());

    let _sub = manager.subscribe(|event| match event.kind {
        SyncEventKind::SyncProgress => {}
        kind => println!("   📣 {} {}", kind, event.error.as_deref().unwrap_or("")),
    });

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Cache data fetched from the remote
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📥 Caching fetched data...");
    manager.cache_recipe(json!({"id": "negroni", "name": "Negroni", "favorite": true})).await?;
    manager.cache_recipe(json!({"id": "daiquiri", "name": "Daiquiri", "timesOrdered": 42})).await?;
    manager.cache_ingredient(json!({"id": "campari", "name": "Campari"})).await?;
    manager.cache_technique(json!({"id": "stir", "name": "Stirring"})).await?;
    manager.cache_menu(json!({"id": "spring", "name": "Spring Menu"})).await?;
    for recipe in manager.get_cached_recipes().await? {
        println!("   └─ {} ({})", recipe.id(), recipe.sync_status);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Edit offline, reconnect
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Going offline and editing...");
    manager.report_connectivity(false, None).await;

    let edit = EntityPayload::from_json(
        EntityType::Recipe,
        json!({"id": "negroni", "name": "Negroni Sbagliato", "favorite": true}),
    )?;
    manager.queue_sync(QueueItemDraft::new(SyncOperation::Update, edit)).await?;

    let urgent = EntityPayload::from_json(EntityType::Menu, json!({"id": "spring", "name": "Spring Menu v2"}))?;
    let conflicted = manager
        .queue_sync(
            QueueItemDraft::new(SyncOperation::Update, urgent)
                .priority(SyncPriority::Critical)
                .strategy(SyncStrategy::Immediate),
        )
        .await?;
    println!("   └─ Counts while offline: {:?}", manager.sync_counts().await?);

    println!("\n📶 Back online (4g)...");
    manager.report_connectivity(true, Some("4g")).await;
    println!("   └─ Counts after sync: {:?}", manager.sync_counts().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Resolve the conflict
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚔️  Resolving conflict by keeping the local copy...");
    manager.resolve_conflict(&conflicted.id, ConflictAction::KeepLocal).await?;
    let run = manager.process_sync_queue().await?;
    println!("   └─ {:?}", run.totals);
    println!("   └─ Counts: {:?}", manager.sync_counts().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Reads and statistics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading through the cache...");
    for _ in 0..3 {
        manager.get_record(EntityType::Recipe, "negroni").await?;
    }
    manager.get_record(EntityType::Recipe, "daiquiri").await?;

    let cache = manager.get_cache_stats().await?;
    println!("   ┌─ Cache");
    println!("   │  └─ Entries: {} ({} bytes)", cache.total_entries, cache.total_bytes);
    println!("   │  └─ Hit rate: {:.0}%", cache.health.hit_rate * 100.0);
    println!("   │  └─ Strategy: {}", cache.strategy);
    for entry in manager.cache().get_cache_entries() {
        println!("   │  └─ {} priority={:.2} accesses={}", entry.key, entry.priority, entry.access_count);
    }

    let report = manager.optimize_storage().await;
    println!("   ├─ Optimization evicted {} entries", report.evicted.len());

    let sync = manager.get_sync_stats().await?;
    println!("   └─ Sync: synced={} conflicts={} queued={}", sync.synced_total, sync.conflicts_total, sync.queued);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    manager.shutdown().await;
    println!("   ✅ State: {}", manager.state());

    for path in [DB_PATH.to_string(), format!("{DB_PATH}-shm"), format!("{DB_PATH}-wal")] {
        let _ = std::fs::remove_file(path);
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("   └─ {line}");
    }
}
