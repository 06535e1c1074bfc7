// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory synchronizer walkthrough over in-memory backends.
//!
//! Demonstrates:
//! 1. Starting the synchronizer against a record store and cache
//! 2. Create, rename, attribute update, soft delete and restore
//! 3. A malformed event being dropped without stopping the listener
//! 4. Routing-layer lookups through the resolver
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=tenant_directory=debug cargo run --example directory_sync
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Map};
use tracing_subscriber::EnvFilter;

use tenant_directory::{
    DirectoryConfig, DirectorySynchronizer, InMemoryCache, InMemoryRecordStore, TenantId,
    TenantRecord, TenantResolver,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         tenant-directory: Synchronizer Walkthrough            ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Start
    // ─────────────────────────────────────────────────────────────────────────
    let config = DirectoryConfig::default();
    let store = Arc::new(InMemoryRecordStore::new(config.schema()));
    let cache = Arc::new(InMemoryCache::new());
    let mut sync = DirectorySynchronizer::new(&config, store.clone(), cache.clone());

    println!("🚀 Starting synchronizer (state: {})", sync.state());
    sync.start().await?;
    println!("   ✅ State: {}", sync.state());
    let resolver = sync.resolver();

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Lifecycle of a few tenants
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating tenants...");
    store.insert(&TenantRecord::new("1", "acme", "Acme").with_extra("domain", "acme.io"));
    store.insert(&TenantRecord::new("2", "globex", "Globex"));
    settle(&sync, 2).await;
    lookup(&resolver, &["acme", "globex"]).await;

    println!("\n✏️  Renaming acme → acme-corp and changing its domain...");
    let acme = TenantId::new("1");
    let mut set = Map::new();
    set.insert("slug".into(), json!("acme-corp"));
    set.insert("domain".into(), json!("acme-corp.io"));
    store.update(&acme, set, &[]);
    settle(&sync, 3).await;
    lookup(&resolver, &["acme", "acme-corp"]).await;

    println!("\n🗑️  Soft-deleting globex...");
    let globex = TenantId::new("2");
    store.soft_delete(&globex);
    settle(&sync, 4).await;
    lookup(&resolver, &["globex"]).await;

    println!("\n♻️  Restoring globex...");
    store.restore(&globex);
    settle(&sync, 5).await;
    lookup(&resolver, &["globex"]).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Poison event
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n☠️  Injecting a malformed event...");
    store.emit_raw(json!({
        "operationType": "update",
        "ns": {"db": config.database, "coll": config.collection},
        "updateDescription": {"updatedFields": {"name": "Nobody"}}
    }));
    settle(&sync, 6).await;
    println!("   └─ Listener still running: {}", sync.is_running());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Stats and cache contents
    // ─────────────────────────────────────────────────────────────────────────
    let stats = sync.stats();
    println!("\n📊 Synchronizer stats:");
    println!("   ┌─ received: {}", stats.received);
    println!("   ├─ applied:  {}", stats.applied);
    println!("   ├─ skipped:  {}", stats.skipped);
    println!("   ├─ ignored:  {}", stats.ignored);
    println!("   └─ dropped:  {} (last: {})", stats.dropped, stats.last_drop.as_deref().unwrap_or("-"));

    println!("\n🗂️  Cache contents:");
    for (key, value) in cache.snapshot() {
        println!("   └─ {} = {:?}", key, value);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Stopping...");
    sync.stop().await?;
    println!("   ✅ State: {}", sync.state());

    Ok(())
}

/// Wait until the loop has handled `n` events.
async fn settle(sync: &DirectorySynchronizer, n: u64) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while sync.stats().processed() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if waited.is_err() {
        println!("   ⚠️  Gave up waiting for event {}", n);
    }
}

async fn lookup(resolver: &TenantResolver, routing_keys: &[&str]) {
    for key in routing_keys {
        match resolver.resolve(key).await {
            Ok(attrs) => println!("   └─ {} → {} (id {}) {:?}", key, attrs.name, attrs.id, attrs.extra),
            Err(e) => println!("   └─ {} → {}", key, e),
        }
    }
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
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.6}", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
