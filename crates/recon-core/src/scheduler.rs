//! Batch scheduler
//!
//! Splits the desired records into ordered chunks of at most `chunk_size`
//! and reconciles each chunk concurrently. Chunks run strictly one after
//! another, so at most `chunk_size` reconciliations are ever in flight.
//!
//! Every record in a chunk is awaited to completion and yields its own
//! outcome; one failure never cuts its siblings short. Whether a chunk with
//! failures stops the remaining chunks is decided by `FailurePolicy`.
//!
//! A record id listed more than once in a batch is never dispatched: every
//! occurrence fails with `ReconcileError::DuplicateRecord`.

use crate::config::{FailurePolicy, ReconcileConfig};
use crate::error::ReconcileError;
use crate::planner::Reconciler;
use crate::report::{BatchReport, ChunkSummary};
use crate::types::{DesiredRecord, ReconciliationOutcome, RecordId};
use futures::future::join_all;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Per-record entry point a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Converge existing records
    Update,
    /// Create missing records
    Install,
}

impl BatchMode {
    /// Lowercase mode name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Install => "install",
        }
    }
}

/// Chunked batch scheduler
pub struct BatchScheduler {
    reconciler: Arc<dyn Reconciler>,
    chunk_size: NonZeroUsize,
    failure_policy: FailurePolicy,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("chunk_size", &self.chunk_size)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    /// Create scheduler from config
    #[inline]
    #[must_use]
    pub fn new(reconciler: Arc<dyn Reconciler>, config: &ReconcileConfig) -> Self {
        Self {
            reconciler,
            chunk_size: config.chunk_size,
            failure_policy: config.failure_policy,
        }
    }

    /// Create scheduler with an explicit chunk size and the default policy
    #[inline]
    #[must_use]
    pub fn with_chunk_size(reconciler: Arc<dyn Reconciler>, chunk_size: NonZeroUsize) -> Self {
        Self {
            reconciler,
            chunk_size,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Configured chunk size
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Converge existing records onto `records`
    pub async fn update(&self, records: &[DesiredRecord]) -> BatchReport {
        self.run(BatchMode::Update, records).await
    }

    /// Create `records`, none of which may exist yet
    pub async fn install(&self, records: &[DesiredRecord]) -> BatchReport {
        self.run(BatchMode::Install, records).await
    }

    /// Run a batch
    pub async fn run(&self, mode: BatchMode, records: &[DesiredRecord]) -> BatchReport {
        let chunk_size = self.chunk_size.get();
        let total_chunks = records.len().div_ceil(chunk_size);
        let mut report = BatchReport {
            outcomes: Vec::with_capacity(records.len()),
            ..BatchReport::default()
        };

        tracing::info!(
            mode = mode.as_str(),
            records = records.len(),
            chunk_size,
            chunks = total_chunks,
            "starting batch"
        );

        let duplicates = duplicate_ids(records);
        for (record_id, occurrences) in &duplicates {
            tracing::warn!(%record_id, occurrences, "record listed more than once, not dispatching");
        }
        let duplicates = &duplicates;

        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let span = tracing::info_span!("chunk", mode = mode.as_str(), index, size = chunk.len());
            let started = Instant::now();

            let outcomes = join_all(chunk.iter().map(|record| async move {
                match duplicates.get(&record.record_id) {
                    Some(&occurrences) => ReconciliationOutcome::failed(
                        record.record_id.clone(),
                        ReconcileError::DuplicateRecord {
                            record_id: record.record_id.clone(),
                            occurrences,
                        },
                    ),
                    None => self.dispatch(mode, record).await,
                }
            }))
            .instrument(span)
            .await;

            let elapsed = started.elapsed();
            let failures = outcomes.iter().filter(|o| o.is_failure()).count();

            metrics::counter!("recon_chunks_total", "mode" => mode.as_str()).increment(1);
            metrics::histogram!("recon_chunk_duration_seconds", "mode" => mode.as_str())
                .record(elapsed.as_secs_f64());
            tracing::debug!(index, failures, ?elapsed, "chunk finished");

            report.outcomes.extend(outcomes);
            report.chunks.push(ChunkSummary {
                index,
                size: chunk.len(),
                failures,
                elapsed,
            });

            let remaining = &records[(index * chunk_size + chunk.len())..];
            if failures > 0 && self.failure_policy == FailurePolicy::Abort && !remaining.is_empty()
            {
                tracing::warn!(
                    index,
                    failures,
                    skipped = remaining.len(),
                    "chunk failed, aborting remaining chunks"
                );
                report.skipped = remaining.iter().map(|r| r.record_id.clone()).collect();
                report.aborted = true;
                break;
            }
        }

        let stats = report.stats();
        tracing::info!(
            mode = mode.as_str(),
            created = stats.created,
            patched = stats.patched,
            replaced = stats.replaced,
            failed = stats.failed,
            skipped = stats.skipped,
            "batch finished"
        );
        report
    }

    async fn dispatch(
        &self,
        mode: BatchMode,
        record: &DesiredRecord,
    ) -> ReconciliationOutcome {
        match mode {
            BatchMode::Update => self.reconciler.update(record).await,
            BatchMode::Install => self.reconciler.install(record).await,
        }
    }
}

/// Record ids carried by more than one desired record, with their counts
fn duplicate_ids(records: &[DesiredRecord]) -> HashMap<RecordId, usize> {
    let mut counts: HashMap<RecordId, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.record_id.clone()).or_default() += 1;
    }
    counts.retain(|_, count| *count > 1);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoreId;
    use parking_lot::Mutex;

    /// Records call order; fails ids starting with "bad"
    #[derive(Debug, Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Reconciler for Recording {
        async fn update(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
            self.calls.lock().push(desired.record_id.to_string());
            if desired.record_id.as_str().starts_with("bad") {
                ReconciliationOutcome::failed(
                    desired.record_id.clone(),
                    ReconcileError::NotFound {
                        record_id: desired.record_id.clone(),
                    },
                )
            } else {
                ReconciliationOutcome::Patched {
                    record_id: desired.record_id.clone(),
                    id: StoreId::new(),
                }
            }
        }

        async fn install(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
            ReconciliationOutcome::Created {
                record_id: desired.record_id.clone(),
                id: StoreId::new(),
            }
        }
    }

    fn records(ids: &[&str]) -> Vec<DesiredRecord> {
        ids.iter().map(|id| DesiredRecord::new(*id, "query")).collect()
    }

    fn scheduler(chunk_size: usize) -> (Arc<Recording>, BatchScheduler) {
        let reconciler = Arc::new(Recording::default());
        let config = ReconcileConfig::new().with_chunk_size(chunk_size).unwrap();
        (reconciler.clone(), BatchScheduler::new(reconciler, &config))
    }

    #[tokio::test]
    async fn seven_records_in_chunks_of_three() {
        let (_, scheduler) = scheduler(3);
        let report = scheduler
            .update(&records(&["a", "b", "c", "d", "e", "f", "g"]))
            .await;

        let sizes: Vec<usize> = report.chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(report.outcomes.len(), 7);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let (_, scheduler) = scheduler(2);
        let input = records(&["a", "b", "c", "d", "e"]);
        let report = scheduler.update(&input).await;

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.record_id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn abort_policy_skips_later_chunks() {
        let (reconciler, scheduler) = scheduler(2);
        let report = scheduler.update(&records(&["a", "bad1", "c", "d", "e"])).await;

        assert!(report.aborted);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.outcomes.len(), 2);
        let skipped: Vec<&str> = report.skipped.iter().map(|r| r.as_str()).collect();
        assert_eq!(skipped, vec!["c", "d", "e"]);
        assert_eq!(reconciler.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn sibling_failure_does_not_hide_outcomes() {
        let (_, scheduler) = scheduler(3);
        let report = scheduler.update(&records(&["a", "bad1", "c"])).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[0].label(), "patched");
        assert_eq!(report.outcomes[1].label(), "failed");
        assert_eq!(report.outcomes[2].label(), "patched");
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn continue_policy_runs_every_chunk() {
        let reconciler = Arc::new(Recording::default());
        let scheduler = BatchScheduler::with_chunk_size(
            reconciler.clone(),
            NonZeroUsize::new(2).unwrap(),
        )
        .with_failure_policy(FailurePolicy::Continue);

        let report = scheduler.update(&records(&["bad1", "b", "bad2", "d", "e"])).await;

        assert!(!report.aborted);
        assert!(report.skipped.is_empty());
        assert_eq!(report.chunks.len(), 3);
        assert_eq!(report.stats().failed, 2);
        assert_eq!(report.stats().patched, 3);
    }

    #[tokio::test]
    async fn failure_in_last_chunk_skips_nothing() {
        let (_, scheduler) = scheduler(2);
        let report = scheduler.update(&records(&["a", "b", "bad"])).await;

        assert!(!report.aborted);
        assert!(report.skipped.is_empty());
        assert_eq!(report.stats().failed, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_empty_report() {
        let (reconciler, scheduler) = scheduler(3);
        let report = scheduler.update(&[]).await;

        assert!(report.outcomes.is_empty());
        assert!(report.chunks.is_empty());
        assert!(reconciler.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn repeated_ids_are_rejected_without_dispatch() {
        let (reconciler, scheduler) = scheduler(3);
        let report = scheduler.update(&records(&["a", "dup", "dup"])).await;

        assert_eq!(*reconciler.calls.lock(), vec!["a".to_string()]);
        assert_eq!(report.stats().patched, 1);
        assert_eq!(report.stats().failed, 2);
        assert!(matches!(
            report.outcomes[2].error(),
            Some(ReconcileError::DuplicateRecord { occurrences: 2, .. })
        ));
    }

    #[test]
    fn duplicate_ids_counts_only_repeats() {
        let found = duplicate_ids(&records(&["a", "b", "a", "c", "a"]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[&RecordId::new("a")], 3);
    }

    #[tokio::test]
    async fn install_mode_dispatches_install() {
        let (_, scheduler) = scheduler(4);
        let report = scheduler.install(&records(&["a", "b"])).await;
        assert_eq!(report.stats().created, 2);
    }
}
