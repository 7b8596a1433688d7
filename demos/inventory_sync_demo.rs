// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inventory sync walkthrough on in-memory backends.
//!
//! Demonstrates:
//! 1. A first full sync creating documents from the ERP snapshot
//! 2. An editor enriching a document (mrp, serial number)
//! 3. An ERP quantity change picked up without touching enrichment
//! 4. A single-item check, then the cached fallback with the ERP down
//! 5. The background loop, run stats and metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example inventory_sync_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use inventory_sync::source::memory::InMemorySource;
use inventory_sync::storage::memory::InMemoryDocumentStore;
use inventory_sync::{DocumentStore, InventorySyncConfig, RawRecord, SyncEngine};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

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
    println!("║           inventory-sync: In-Memory Walkthrough               ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Seed the ERP and run a first sync
    // ─────────────────────────────────────────────────────────────────────────
    let source = Arc::new(InMemorySource::with_records([
        RawRecord::new("ITM-001", 42.0).with_name("Hex Bolt M8"),
        RawRecord::new("ITM-002", 7.0).with_name("Spring Washer"),
        RawRecord::new("ITM-003", 120.0).with_name("Lock Nut M8"),
    ]));
    let store = Arc::new(InMemoryDocumentStore::new());
    let config = InventorySyncConfig {
        batch_size: 2,
        ..Default::default()
    };
    let engine = Arc::new(SyncEngine::new(&config, source.clone(), store.clone()));

    println!("📦 First full sync...");
    let run = engine.sync_now().await?;
    println!(
        "   created={} updated={} unchanged={} errors={}",
        run.items_created, run.items_updated, run.items_unchanged, run.errors
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 2. An editor enriches a record
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✍️  Editor sets mrp and serial number on ITM-001");
    let enrichment = json!({"mrp": 18.5, "serial_number": "SN-0001"});
    if let serde_json::Value::Object(fields) = enrichment {
        store.update_fields("ITM-001", &fields).await?;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. ERP moves stock
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🏭 ERP ships 2 bolts (42 → 40), sync again...");
    source.set_quantity("ITM-001", 40.0);
    let run = engine.sync_now().await?;
    println!("   updated={} unchanged={}", run.items_updated, run.items_unchanged);

    if let Some(record) = store.find_one("ITM-001").await? {
        println!(
            "   ITM-001: stock_qty={} delta={:?} mrp={:?} serial={:?}",
            record.stock_qty, record.qty_change_delta, record.mrp, record.serial_number
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Single-item checks
    // ─────────────────────────────────────────────────────────────────────────
    source.set_quantity("ITM-002", 9.0);
    let checked = engine.check_item("ITM-002").await?;
    println!("\n🔍 check_item(ITM-002): {:?} qty={} ({})", checked.source, checked.quantity, checked.message);

    source.set_available(false);
    let cached = engine.check_item("ITM-002").await?;
    println!("🔌 ERP down, check_item(ITM-002): {:?} qty={} ({})", cached.source, cached.quantity, cached.message);
    source.set_available(true);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Background loop
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏱️  Background loop every 100ms for half a second...");
    engine.set_interval(Duration::from_millis(100));
    engine.start_background();
    println!("   State: {}", engine.state());
    tokio::time::sleep(Duration::from_millis(550)).await;
    engine.shutdown().await;
    println!("   State: {}", engine.state());

    let stats = engine.stats();
    println!("\n📊 Stats:");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(meta) = store.metadata("sql_qty_sync") {
        println!("\n🗂️  Metadata total_syncs={}", meta["total_syncs"]);
    }

    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n✅ Done.\n");
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_kind, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let max = samples.iter().map(|v| v.into_inner()).fold(f64::NEG_INFINITY, f64::max);
                histograms.push((name, label_str, count, sum, max));
            }
        }
    }

    counters.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    gauges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    histograms.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum, max) in &histograms {
            if *count == 0 {
                println!("   │  └─ {}{} = (no samples)", name, labels);
            } else {
                println!("   │  └─ {}{}", name, labels);
                println!("   │     count={} sum={:.4} max={:.4}", count, sum, max);
            }
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
