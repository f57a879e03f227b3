//! Batch reports
//!
//! A `BatchReport` always carries every outcome the scheduler produced,
//! failures included. Callers that want all-or-nothing semantics use
//! `into_result`.

use crate::error::ReconcileError;
use crate::types::{ReconciliationOutcome, RecordId};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::time::Duration;

/// Summary of one executed chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Zero-based chunk position
    pub index: usize,
    /// Records in the chunk
    pub size: usize,
    /// Failed records in the chunk
    pub failures: usize,
    /// Wall time from first dispatch to last completion
    pub elapsed: Duration,
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Records created
    pub created: usize,
    /// Records patched in place
    pub patched: usize,
    /// Records replaced
    pub replaced: usize,
    /// Records that failed
    pub failed: usize,
    /// Records never scheduled
    pub skipped: usize,
}

impl BatchStats {
    /// Records that were scheduled
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.created + self.patched + self.replaced + self.failed
    }
}

/// Result of a batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Outcomes in input order
    pub outcomes: Vec<ReconciliationOutcome>,
    /// Executed chunks in execution order
    pub chunks: Vec<ChunkSummary>,
    /// Records not scheduled because the batch aborted
    pub skipped: Vec<RecordId>,
    /// Whether later chunks were dropped after a failure
    pub aborted: bool,
}

impl BatchReport {
    /// Outcome counts
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats {
            skipped: self.skipped.len(),
            ..BatchStats::default()
        };
        for outcome in &self.outcomes {
            match outcome {
                ReconciliationOutcome::Created { .. } => stats.created += 1,
                ReconciliationOutcome::Patched { .. } => stats.patched += 1,
                ReconciliationOutcome::Replaced { .. } => stats.replaced += 1,
                ReconciliationOutcome::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }

    /// Check that every record was scheduled and succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && !self.outcomes.iter().any(ReconciliationOutcome::is_failure)
    }

    /// Failed outcomes in input order
    pub fn failures(&self) -> impl Iterator<Item = &ReconciliationOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// First error in input order
    #[must_use]
    pub fn first_failure(&self) -> Option<&ReconcileError> {
        self.outcomes.iter().find_map(ReconciliationOutcome::error)
    }

    /// Outcome for a record id
    #[must_use]
    pub fn outcome(&self, record_id: &RecordId) -> Option<&ReconciliationOutcome> {
        self.outcomes.iter().find(|o| o.record_id() == record_id)
    }

    /// Collapse into the successful outcomes or the first error
    ///
    /// # Errors
    /// The first `ReconcileError` in input order, identifying the failed record
    pub fn into_result(self) -> Result<Vec<ReconciliationOutcome>, ReconcileError> {
        let mut outcomes = Vec::with_capacity(self.outcomes.len());
        for outcome in self.outcomes {
            match outcome {
                ReconciliationOutcome::Failed { error, .. } => return Err(error),
                other => outcomes.push(other),
            }
        }
        Ok(outcomes)
    }

    /// JSON rendering for machine consumers
    #[must_use]
    pub fn to_json(&self) -> Value {
        let outcomes: Vec<Value> = self
            .outcomes
            .iter()
            .map(|outcome| match outcome {
                ReconciliationOutcome::Created { record_id, id }
                | ReconciliationOutcome::Patched { record_id, id } => json!({
                    "record_id": record_id,
                    "status": outcome.label(),
                    "id": id,
                }),
                ReconciliationOutcome::Replaced {
                    record_id,
                    previous,
                    id,
                } => json!({
                    "record_id": record_id,
                    "status": outcome.label(),
                    "previous_id": previous,
                    "id": id,
                }),
                ReconciliationOutcome::Failed { record_id, error } => json!({
                    "record_id": record_id,
                    "status": outcome.label(),
                    "error": error.to_string(),
                    "retryable": error.is_retryable(),
                }),
            })
            .collect();

        let chunks: Vec<Value> = self
            .chunks
            .iter()
            .map(|c| {
                json!({
                    "index": c.index,
                    "size": c.size,
                    "failures": c.failures,
                    "elapsed_ms": u64::try_from(c.elapsed.as_millis()).unwrap_or(u64::MAX),
                })
            })
            .collect();

        json!({
            "stats": self.stats(),
            "aborted": self.aborted,
            "outcomes": outcomes,
            "chunks": chunks,
            "skipped": self.skipped,
        })
    }

    /// Human-readable rendering
    #[must_use]
    pub fn render_text(&self) -> String {
        let stats = self.stats();
        let mut out = String::new();

        let _ = writeln!(out, "Reconciliation Report");
        let _ = writeln!(out, "=====================");
        let _ = writeln!(out, "  Chunks:   {}", self.chunks.len());
        let _ = writeln!(out, "  Created:  {}", stats.created);
        let _ = writeln!(out, "  Patched:  {}", stats.patched);
        let _ = writeln!(out, "  Replaced: {}", stats.replaced);
        let _ = writeln!(out, "  Failed:   {}", stats.failed);
        let _ = writeln!(out, "  Skipped:  {}", stats.skipped);

        if stats.failed > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failures:");
            for outcome in self.failures() {
                if let ReconciliationOutcome::Failed { record_id, error } = outcome {
                    let _ = writeln!(out, "  {record_id}: {error}");
                }
            }
        }

        if self.aborted {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Batch aborted; {} record(s) not scheduled",
                self.skipped.len()
            );
        }

        let _ = write!(out, "Status: {}", if self.is_success() { "OK" } else { "FAILED" });
        out
    }
}
