//! Import coordinator tests: full runs, collapsing triggers, cancellation in
//! every active phase, reads during an import

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chain_taxdump, node_line, small_taxdump, FlakyStore, SlowSource};
use taxa_common::TaxonId;
use taxa_server::ingest::taxdump::{LoaderConfig, SourceProvider, StaticSource};
use taxa_server::ingest::{ImportConfig, ImportCoordinator, ImportJob, ImportPhase, TriggerOutcome};
use taxa_server::lineage::{LineageConfig, LineageEngine};
use taxa_server::store::{MemoryStore, TaxonStore};

fn config(batch_size: usize) -> ImportConfig {
    ImportConfig {
        loader: LoaderConfig::default()
            .with_batch_size(batch_size)
            .with_retry_delay(Duration::from_millis(1)),
        ..ImportConfig::default()
    }
}

fn coordinator(store: Arc<dyn TaxonStore>, taxdump: (String, String), batch_size: usize) -> ImportCoordinator {
    let (nodes, names) = taxdump;
    ImportCoordinator::new(store, Arc::new(StaticSource::new(nodes, names)), config(batch_size))
}

fn coordinator_with_source(
    store: Arc<dyn TaxonStore>,
    source: impl SourceProvider + 'static,
    batch_size: usize,
) -> ImportCoordinator {
    ImportCoordinator::new(store, Arc::new(source), config(batch_size))
}

/// Cancel once the job reaches `phase` and return the final snapshot
async fn cancel_in(coordinator: &ImportCoordinator, phase: ImportPhase) -> ImportJob {
    coordinator.trigger();
    let mut rx = coordinator.subscribe();
    rx.wait_for(|job| job.phase == phase).await.unwrap();
    assert!(coordinator.cancel(), "cancel refused in {phase}");
    coordinator.wait().await
}

#[tokio::test]
async fn test_import_runs_to_complete() {
    let store = MemoryStore::new();
    let coordinator = coordinator(Arc::new(store.clone()), small_taxdump(), 2);
    assert_eq!(coordinator.status().phase, ImportPhase::Idle);

    let outcome = coordinator.trigger();
    let job = coordinator.wait().await;

    assert_eq!(job.id, outcome.job_id());
    assert_eq!(job.phase, ImportPhase::Complete, "job failed: {:?}", job.last_error);
    assert_eq!(job.counts.nodes_committed, 4);
    assert_eq!(job.counts.edges_committed, 4);
    assert_eq!(job.counts.total_expected, Some(4));
    assert_eq!(job.completion_percentage(), 100.0);
    assert!(job.finished_at.is_some());
    assert!(!coordinator.cancel());
    assert_eq!(coordinator.status().phase, ImportPhase::Complete);

    let engine = LineageEngine::new(Arc::new(store), LineageConfig::default());
    assert_eq!(engine.lineage(3).await.unwrap().ids(), vec![3, 2, 1]);
}

#[tokio::test]
async fn test_subscriber_sees_phases_in_order() {
    let store = FlakyStore::new(MemoryStore::new()).with_delay(Duration::from_millis(1));
    let coordinator = coordinator(Arc::new(store), chain_taxdump(20), 5);
    let mut rx = coordinator.subscribe();

    coordinator.trigger();
    let mut phases = vec![rx.borrow_and_update().phase];
    while rx.changed().await.is_ok() {
        let phase = rx.borrow_and_update().phase;
        if phases.last() != Some(&phase) {
            phases.push(phase);
        }
        if phase.is_terminal() {
            break;
        }
    }

    // Snapshots may coalesce, but never go backwards
    assert!(phases.windows(2).all(|w| order(w[0]) < order(w[1])));
    assert_eq!(phases.first(), Some(&ImportPhase::Downloading));
    assert!(phases.contains(&ImportPhase::Loading));
    assert_eq!(phases.last(), Some(&ImportPhase::Complete));
}

fn order(phase: ImportPhase) -> u8 {
    match phase {
        ImportPhase::Idle => 0,
        ImportPhase::Downloading => 1,
        ImportPhase::Parsing => 2,
        ImportPhase::Loading => 3,
        ImportPhase::Verifying => 4,
        ImportPhase::Complete | ImportPhase::Failed => 5,
    }
}

#[tokio::test]
async fn test_concurrent_triggers_collapse() {
    let coordinator = coordinator(Arc::new(MemoryStore::new()), chain_taxdump(10), 2);

    let first = coordinator.trigger();
    let second = coordinator.trigger();
    let third = coordinator.clone().trigger();

    assert!(matches!(first, TriggerOutcome::Started(_)));
    assert_eq!(second, TriggerOutcome::AlreadyRunning(first.job_id()));
    assert_eq!(third, TriggerOutcome::AlreadyRunning(first.job_id()));

    let job = coordinator.wait().await;
    assert_eq!(job.phase, ImportPhase::Complete);
}

#[tokio::test]
async fn test_cancel_then_retrigger_converges() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(memory.clone()).with_delay(Duration::from_millis(5));
    let coordinator = coordinator(Arc::new(store), chain_taxdump(40), 2);

    assert!(!coordinator.cancel());
    coordinator.trigger();

    let mut rx = coordinator.subscribe();
    rx.wait_for(|job| job.counts.nodes_committed >= 4).await.unwrap();
    assert!(coordinator.cancel());

    let cancelled = coordinator.wait().await;
    assert_eq!(cancelled.phase, ImportPhase::Failed);
    let error = cancelled.last_error.unwrap();
    assert!(error.is_cancelled());
    assert_eq!(error.phase, ImportPhase::Loading);
    assert!(cancelled.counts.nodes_committed < 40);

    let retry = coordinator.trigger();
    assert!(matches!(retry, TriggerOutcome::Started(id) if id != cancelled.id));
    let job = coordinator.wait().await;

    assert_eq!(job.phase, ImportPhase::Complete);
    assert_eq!(memory.count_nodes().await.unwrap(), 40);
    assert_eq!(memory.snapshot().await.len(), 40);
}

#[tokio::test]
async fn test_malformed_hierarchy_fails_in_parsing() {
    let nodes = [node_line(1, 1, "no rank"), node_line(2, 2, "no rank")].concat();
    let store = MemoryStore::new();
    let coordinator = coordinator(Arc::new(store.clone()), (nodes, String::new()), 2);

    coordinator.trigger();
    let job = coordinator.wait().await;

    assert_eq!(job.phase, ImportPhase::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.phase, ImportPhase::Parsing);
    assert_eq!(error.kind, "malformed_hierarchy");
    assert_eq!(store.attribute_count().await, 0);
}

#[tokio::test]
async fn test_load_failure_recorded_and_resumable() {
    let memory = MemoryStore::new();
    let flaky = FlakyStore::new(memory.clone()).with_fatal_commit(1);
    let coordinator = coordinator(Arc::new(flaky), chain_taxdump(6), 2);

    coordinator.trigger();
    let job = coordinator.wait().await;
    assert_eq!(job.phase, ImportPhase::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, "load_failure");
    assert_eq!(error.phase, ImportPhase::Loading);

    // The injected failure only hits commit #1; a second run completes
    coordinator.trigger();
    let job = coordinator.wait().await;
    assert_eq!(job.phase, ImportPhase::Complete);
    assert_eq!(memory.count_nodes().await.unwrap(), 6);
}

#[tokio::test]
async fn test_start_if_empty_skips_populated_store() {
    let store = MemoryStore::new();
    let coordinator = coordinator(Arc::new(store.clone()), small_taxdump(), 10);

    let outcome = coordinator.start_if_empty().await.unwrap();
    assert!(matches!(outcome, Some(TriggerOutcome::Started(_))));
    assert_eq!(coordinator.wait().await.phase, ImportPhase::Complete);

    assert!(coordinator.start_if_empty().await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_snapshot_serializes() {
    let coordinator = coordinator(Arc::new(MemoryStore::new()), small_taxdump(), 10);
    coordinator.trigger();
    let job = coordinator.wait().await;

    let json = job.to_json().unwrap();
    assert_eq!(json["phase"], "complete");
    assert_eq!(json["counts"]["nodes_committed"], 4);
}

#[tokio::test]
async fn test_shutdown_cancels_running_job() {
    let store = FlakyStore::new(MemoryStore::new()).with_delay(Duration::from_millis(20));
    let coordinator = coordinator(Arc::new(store), chain_taxdump(40), 1);

    coordinator.trigger();
    let job = coordinator.shutdown().await;

    assert_eq!(job.phase, ImportPhase::Failed);
    assert!(job.last_error.unwrap().is_cancelled());
}

#[tokio::test]
async fn test_cancel_while_downloading() {
    let store = MemoryStore::new();
    let source = SlowSource::new(small_taxdump()).with_open_delay(Duration::from_secs(30));
    let coordinator = coordinator_with_source(Arc::new(store.clone()), source, 2);

    let job = cancel_in(&coordinator, ImportPhase::Downloading).await;

    assert_eq!(job.phase, ImportPhase::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, "cancelled");
    assert_eq!(error.phase, ImportPhase::Downloading);
    assert_eq!(store.attribute_count().await, 0);
}

#[tokio::test]
async fn test_cancel_while_parsing() {
    let store = MemoryStore::new();
    let source = SlowSource::new(chain_taxdump(20)).with_read_delay(Duration::from_millis(100));
    let coordinator = coordinator_with_source(Arc::new(store.clone()), source, 2);

    let job = cancel_in(&coordinator, ImportPhase::Parsing).await;

    assert_eq!(job.phase, ImportPhase::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, "cancelled");
    assert_eq!(error.phase, ImportPhase::Parsing);
    assert_eq!(job.counts.nodes_committed, 0);
    assert_eq!(store.attribute_count().await, 0);
}

#[tokio::test]
async fn test_cancel_while_verifying() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(memory.clone()).with_read_delay(Duration::from_millis(5));
    let coordinator = coordinator(Arc::new(store), chain_taxdump(40), 10);

    let job = cancel_in(&coordinator, ImportPhase::Verifying).await;

    assert_eq!(job.phase, ImportPhase::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, "cancelled");
    assert_eq!(error.phase, ImportPhase::Verifying);
    // Loading had finished; only the verdict is withheld
    assert_eq!(memory.count_nodes().await.unwrap(), 40);
}

#[tokio::test]
async fn test_lineage_reads_during_import_are_whole_or_not_found() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(memory.clone()).with_delay(Duration::from_millis(2));
    let coordinator = coordinator(Arc::new(store), chain_taxdump(40), 2);
    let engine = LineageEngine::new(Arc::new(memory), LineageConfig::default());
    let full: Vec<TaxonId> = (1..=40).rev().collect();

    coordinator.trigger();
    let mut not_found = 0;
    loop {
        let settled = !coordinator.status().phase.is_active();
        match engine.lineage(40).await {
            Ok(path) => assert_eq!(path.ids(), full),
            Err(e) => {
                assert!(e.is_not_found(), "unexpected lineage error: {e}");
                not_found += 1;
            },
        }
        if settled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(coordinator.wait().await.phase, ImportPhase::Complete);
    assert!(not_found > 0);
    assert_eq!(engine.lineage(40).await.unwrap().ids(), full);
}
