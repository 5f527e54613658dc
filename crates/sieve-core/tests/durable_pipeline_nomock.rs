//! No-mock tests for the durable pipeline.
//!
//! Covers:
//! - Parquet output under the configured data directory
//! - Dead letters for critical entries a sink refuses
//! - Retention pruning leaves fresh partitions alone
//! - Operator drains through a live sink

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sieve_common::{ManualClock, MessageType, QueueKey};
use sieve_config::SieveConfig;
use sieve_core::monitor::{HealthStatus, ScriptedSource};
use sieve_core::sink::memory::{Injected, MemorySink};
use sieve_core::system::{is_headed_for_storage, Sieve};
use sieve_telemetry::{batch_to_records, read_parquet_file};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;

// ============================================================================
// Helpers
// ============================================================================

fn durable_sieve(dir: &TempDir, extra: Option<Arc<MemorySink>>) -> Sieve {
    let mut config = SieveConfig::default();
    config.storage.data_dir = Some(dir.path().to_path_buf());
    config.sinks.retry_base_ms = 1;
    config.sinks.retry_ceiling_ms = 2;

    let mut builder = Sieve::builder(config)
        .clock(ManualClock::shared(T0))
        .metrics_source(Box::new(ScriptedSource::steady(10.0, 10.0)))
        .instance_id("durable-test")
        .durable(true);
    if let Some(sink) = extra {
        builder = builder.sink(sink);
    }
    builder.build().unwrap()
}

fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(parquet_files(&path));
        } else if path.extension().is_some_and(|e| e == "parquet") {
            out.push(path);
        }
    }
    out.sort();
    out
}

fn persisted_ids(dir: &Path) -> Vec<u64> {
    let mut ids = Vec::new();
    for file in parquet_files(dir) {
        for batch in read_parquet_file(&file).unwrap() {
            ids.extend(batch_to_records(&batch).unwrap().iter().map(|r| r.message_id));
        }
    }
    ids.sort_unstable();
    ids
}

// ============================================================================
// Parquet output
// ============================================================================

#[test]
fn shutdown_flushes_records_to_parquet() {
    let dir = TempDir::new().unwrap();
    let sieve = durable_sieve(&dir, None);
    assert_eq!(sieve.data_dir(), dir.path());

    let mut expected = Vec::new();
    for (t, payload) in [
        (MessageType::Critical, "disk failed"),
        (MessageType::Error, "request failed"),
        (MessageType::Info, "request served"),
        (MessageType::Debug, "cache probe"),
        (MessageType::Trace, "loop tick"),
    ] {
        let submission = sieve.log(t, "api", "Handler", "serve", payload).unwrap();
        if is_headed_for_storage(&submission.decision) {
            expected.push(submission.id.0);
        }
    }
    assert!(!expected.is_empty());

    let report = sieve.shutdown();
    assert_eq!(report.delivered, expected.len());
    assert_eq!(report.dead_lettered, 0);

    let files = parquet_files(&dir.path().join("records"));
    assert!(!files.is_empty(), "no parquet output under {}", dir.path().display());
    assert_eq!(persisted_ids(&dir.path().join("records")), expected);
}

#[test]
fn fresh_partitions_survive_pruning() {
    let dir = TempDir::new().unwrap();
    let sieve = durable_sieve(&dir, None);
    sieve
        .log(MessageType::Error, "api", "Handler", "serve", "boom")
        .unwrap();
    sieve.shutdown();
    let before = parquet_files(&dir.path().join("records"));

    assert_eq!(sieve.prune_storage().unwrap(), 0);
    assert_eq!(parquet_files(&dir.path().join("records")), before);
}

// ============================================================================
// Dead letters
// ============================================================================

#[test]
fn refused_critical_entries_are_dead_lettered() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(MemorySink::new("broken"));
    broken.inject([Injected::Fatal]);
    let sieve = durable_sieve(&dir, Some(broken.clone()));

    let critical = sieve
        .log(MessageType::Critical, "api", "Disk", "write", "disk failed")
        .unwrap();
    sieve
        .log(MessageType::Error, "api", "Handler", "serve", "request failed")
        .unwrap();
    let report = sieve.shutdown();

    assert_eq!(report.dead_lettered, 1);
    let store = sieve.dead_letters().expect("durable mode keeps dead letters");
    assert_eq!(store.count(), 1);
    let records = store.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id, critical.id.0);

    // The healthy parquet sink still received both.
    assert_eq!(persisted_ids(&dir.path().join("records")).len(), 2);

    let status = sieve.status();
    assert_eq!(status.dead_letters, 1);
    let broken_status = status.sinks.iter().find(|s| s.name == "broken").unwrap();
    assert_eq!(broken_status.health, HealthStatus::Failed);
    assert!(broken_status.last_error.is_some());
}

// ============================================================================
// Operator drain
// ============================================================================

#[test]
fn operator_drain_delivers_to_live_sinks() {
    let dir = TempDir::new().unwrap();
    let mem = Arc::new(MemorySink::new("mem"));
    let sieve = durable_sieve(&dir, Some(mem.clone()));

    let info = sieve
        .log(MessageType::Info, "api", "Handler", "serve", "ok")
        .unwrap();
    let error = sieve
        .log(MessageType::Error, "api", "Handler", "serve", "bad")
        .unwrap();

    let key = QueueKey::default_for("api");
    let (summaries, report) = sieve.drain_queue(&key, 1).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, error.id);
    assert_eq!(report.drained, 1);
    assert_eq!(mem.accepted_ids(), vec![error.id.0]);

    let (rest, _) = sieve.drain_queue(&key, 10).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, info.id);
    assert_eq!(mem.accepted_ids(), vec![error.id.0, info.id.0]);
}
