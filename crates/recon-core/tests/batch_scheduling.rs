//! Chunking, concurrency bound and chunk ordering

use proptest::prelude::*;
use recon_core::{
    BatchScheduler, FailurePolicy, ReconcileConfig, ReconcileError, ReconciliationPlanner,
    RecordId, StoreOp,
};
use recon_store::InMemoryRecordStore;
use recon_test_utils::{
    desired, numbered, numbered_stored, seeded_store, stored, ProbeEvent, ProbeReconciler,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

fn chunk(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap()
}

/// Every record of chunk `i` finishes before any record of chunk `i + 1` starts.
fn assert_chunks_serialized(probe: &ProbeReconciler, ids: &[RecordId], chunk_size: usize) {
    let chunks: Vec<&[RecordId]> = ids.chunks(chunk_size).collect();
    for pair in chunks.windows(2) {
        let last_finish = pair[0]
            .iter()
            .map(|id| probe.position(&ProbeEvent::Finish(id.clone())).unwrap())
            .max()
            .unwrap();
        let first_start = pair[1]
            .iter()
            .map(|id| probe.position(&ProbeEvent::Start(id.clone())).unwrap())
            .min()
            .unwrap();
        assert!(
            last_finish < first_start,
            "chunk starting at {} began before the previous chunk finished",
            pair[1][0]
        );
    }
}

#[tokio::test]
async fn seven_records_with_chunk_three() {
    let probe = Arc::new(ProbeReconciler::new(Duration::from_millis(5)));
    let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(3));
    let records = numbered(7, "query");

    let report = scheduler.update(&records).await;

    let sizes: Vec<usize> = report.chunks.iter().map(|c| c.size).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(report.outcomes.len(), 7);
    assert!(report.is_success());
    assert!(probe.peak() <= 3);

    let ids: Vec<RecordId> = records.iter().map(|r| r.record_id.clone()).collect();
    assert_chunks_serialized(&probe, &ids, 3);
}

#[tokio::test]
async fn chunk_runs_its_records_concurrently() {
    let probe = Arc::new(ProbeReconciler::new(Duration::from_millis(20)));
    let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(4));

    scheduler.update(&numbered(8, "query")).await;

    assert_eq!(probe.peak(), 4);
}

#[tokio::test]
async fn outcomes_follow_input_order() {
    let probe = Arc::new(ProbeReconciler::new(Duration::ZERO));
    let scheduler = BatchScheduler::with_chunk_size(probe, chunk(4));
    let records = numbered(10, "query");

    let report = scheduler.update(&records).await;

    let expected: Vec<&RecordId> = records.iter().map(|r| &r.record_id).collect();
    let actual: Vec<&RecordId> = report.outcomes.iter().map(|o| o.record_id()).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn abort_skips_chunks_after_failure() {
    let probe = Arc::new(ProbeReconciler::new(Duration::ZERO).failing(["rule-004"]));
    let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(3));

    let report = scheduler.update(&numbered(9, "query")).await;

    assert!(report.aborted);
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.stats().failed, 1);
    assert_eq!(probe.started().len(), 6);
    assert_eq!(
        report.first_failure().map(|e| e.record_id().as_str()),
        Some("rule-004")
    );
    assert!(report.into_result().is_err());
}

#[tokio::test]
async fn continue_policy_attempts_everything() {
    let probe = Arc::new(ProbeReconciler::new(Duration::ZERO).failing(["rule-001", "rule-007"]));
    let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(3))
        .with_failure_policy(FailurePolicy::Continue);

    let report = scheduler.update(&numbered(9, "query")).await;

    assert!(!report.aborted);
    assert!(report.skipped.is_empty());
    assert_eq!(report.outcomes.len(), 9);
    assert_eq!(report.stats().failed, 2);
    assert_eq!(report.stats().patched, 7);
    assert_eq!(probe.started().len(), 9);
}

/// Scheduler, planner and store together: store concurrency never exceeds
/// the chunk size and every record gets patched.
#[tokio::test]
async fn store_concurrency_is_bounded_by_chunk_size() {
    let store = Arc::new(InMemoryRecordStore::new().with_latency(Duration::from_millis(5)));
    store.seed(numbered_stored(12, "query")).unwrap();

    let config = ReconcileConfig::new().with_chunk_size(5).unwrap();
    let planner = Arc::new(ReconciliationPlanner::from_config(store.clone(), &config));
    let scheduler = BatchScheduler::new(planner, &config);

    let report = scheduler.update(&numbered(12, "query")).await;

    assert!(report.is_success());
    assert_eq!(report.stats().patched, 12);
    assert!(store.peak_in_flight() <= 5);
    assert_eq!(store.journal().calls_of(StoreOp::Patch).len(), 12);
    assert!(store.snapshot().iter().all(|r| r.enabled && r.revision == 2));
}

#[tokio::test]
async fn install_batch_creates_records() {
    let store = Arc::new(InMemoryRecordStore::new());
    let config = ReconcileConfig::new().with_chunk_size(2).unwrap();
    let planner = Arc::new(ReconciliationPlanner::from_config(store.clone(), &config));
    let scheduler = BatchScheduler::new(planner, &config);

    let report = scheduler.install(&numbered(5, "query")).await;

    assert_eq!(report.stats().created, 5);
    assert_eq!(report.chunks.len(), 3);
    assert_eq!(store.len(), 5);
}

/// Two desired entries for r1 in one chunk must not race on the stored object.
#[tokio::test]
async fn repeated_record_id_fails_without_store_traffic() {
    let store = seeded_store(vec![stored("r1", "query", true, Vec::new())]);
    let config = ReconcileConfig::new().with_chunk_size(2).unwrap();
    let planner = Arc::new(ReconciliationPlanner::from_config(store.clone(), &config));
    let scheduler = BatchScheduler::new(planner, &config);

    let report = scheduler
        .update(&[desired("r1", "threshold"), desired("r1", "eql")])
        .await;

    assert_eq!(report.stats().failed, 2);
    for outcome in &report.outcomes {
        assert!(matches!(
            outcome.error(),
            Some(ReconcileError::DuplicateRecord { record_id, occurrences: 2 })
                if record_id.as_str() == "r1"
        ));
    }
    assert!(store.journal().is_empty());
    assert_eq!(store.get(&RecordId::new("r1")).unwrap().kind.as_str(), "query");
}

#[tokio::test]
async fn repeated_record_id_leaves_other_records_alone() {
    let probe = Arc::new(ProbeReconciler::new(Duration::ZERO));
    let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(4))
        .with_failure_policy(FailurePolicy::Continue);
    let mut records = numbered(3, "query");
    records.push(desired("rule-001", "eql"));

    let report = scheduler.update(&records).await;

    assert_eq!(probe.started(), vec![RecordId::new("rule-000"), RecordId::new("rule-002")]);
    assert_eq!(report.stats().patched, 2);
    assert_eq!(report.stats().failed, 2);
    assert_eq!(report.outcomes[1].label(), "failed");
    assert_eq!(report.outcomes[3].label(), "failed");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunks_partition_input(count in 0usize..40, size in 1usize..12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let probe = Arc::new(ProbeReconciler::new(Duration::ZERO));
        let scheduler = BatchScheduler::with_chunk_size(probe.clone(), chunk(size));
        let records = numbered(count, "query");

        let report = runtime.block_on(scheduler.update(&records));

        prop_assert_eq!(report.chunks.len(), count.div_ceil(size));
        prop_assert!(report.chunks.iter().all(|c| c.size <= size));
        prop_assert_eq!(report.chunks.iter().map(|c| c.size).sum::<usize>(), count);
        prop_assert_eq!(report.outcomes.len(), count);
        prop_assert!(probe.peak() <= size);

        let ids: Vec<RecordId> = records.iter().map(|r| r.record_id.clone()).collect();
        assert_chunks_serialized(&probe, &ids, size);
    }
}
