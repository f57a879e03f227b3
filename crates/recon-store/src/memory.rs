//! In-memory record store
//!
//! A complete `RecordStore` backed by concurrent maps:
//! - One object per record id; creating a taken id is a conflict
//! - Patches merge params and bump the revision
//! - Optional per-call latency so calls in a chunk overlap
//! - One-shot fault injection per (operation, record id)
//! - Call journal and peak concurrency gauge for inspection

use crate::journal::CallJournal;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use recon_core::{
    ExistingRecord, NewRecord, RecordId, RecordPatch, RecordStore, StoreError, StoreId, StoreOp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Concurrent in-memory store
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    /// Stored objects
    objects: DashMap<StoreId, ExistingRecord>,
    /// Record id to object id
    index: DashMap<RecordId, StoreId>,
    /// Delay applied to every call
    latency: Option<Duration>,
    /// Pending one-shot faults
    faults: Mutex<HashMap<(StoreOp, RecordId), StoreError>>,
    /// Calls in arrival order
    journal: CallJournal,
    /// Calls currently executing
    in_flight: AtomicUsize,
    /// Highest `in_flight` observed
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight gauge on drop
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRecordStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With per-call latency
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert records directly, bypassing the journal
    ///
    /// # Errors
    /// `StoreError::Conflict` at the first record whose id is already stored,
    /// including one repeated within `records`. Records before it stay inserted.
    pub fn seed(
        &self,
        records: impl IntoIterator<Item = NewRecord>,
    ) -> Result<Vec<StoreId>, StoreError> {
        let ids = records
            .into_iter()
            .map(|record| self.insert(record))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = ids.len(), "seeded store");
        Ok(ids)
    }

    /// Fail the next `op` for `record_id` with `error`
    pub fn fail_next(&self, op: StoreOp, record_id: impl Into<RecordId>, error: StoreError) {
        self.faults.lock().insert((op, record_id.into()), error);
    }

    /// Stored object for a record id
    #[must_use]
    pub fn get(&self, record_id: &RecordId) -> Option<ExistingRecord> {
        let id = *self.index.get(record_id)?;
        self.objects.get(&id).map(|r| r.value().clone())
    }

    /// All stored objects, ordered by record id
    #[must_use]
    pub fn snapshot(&self) -> Vec<ExistingRecord> {
        let mut records: Vec<ExistingRecord> =
            self.objects.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        records
    }

    /// Number of stored objects
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Call journal
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    /// Highest number of concurrently executing calls seen
    #[inline]
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Reset the journal and the concurrency gauge
    pub fn reset_stats(&self) {
        self.journal.clear();
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }

    fn insert(&self, record: NewRecord) -> Result<StoreId, StoreError> {
        match self.index.entry(record.record_id.clone()) {
            Entry::Occupied(entry) => Err(StoreError::Conflict(format!(
                "record {} already stored as {}",
                record.record_id,
                entry.get()
            ))),
            Entry::Vacant(entry) => {
                let id = StoreId::new();
                entry.insert(id);
                self.objects.insert(id, record.into_existing(id));
                Ok(id)
            }
        }
    }

    fn record_id_of(&self, id: &StoreId) -> Option<RecordId> {
        self.objects.get(id).map(|r| r.record_id.clone())
    }

    fn take_fault(&self, op: StoreOp, record_id: Option<&RecordId>) -> Result<(), StoreError> {
        let Some(record_id) = record_id else {
            return Ok(());
        };
        match self.faults.lock().remove(&(op, record_id.clone())) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Journal the call, mark it in flight and wait out the latency
    async fn enter(&self, op: StoreOp, target: String) -> InFlight<'_> {
        self.journal.append(op, target);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        guard
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn read(&self, record_id: &RecordId) -> Result<Option<ExistingRecord>, StoreError> {
        let _guard = self.enter(StoreOp::Read, record_id.to_string()).await;
        self.take_fault(StoreOp::Read, Some(record_id))?;
        Ok(self.get(record_id))
    }

    async fn create(&self, record: NewRecord) -> Result<ExistingRecord, StoreError> {
        let _guard = self.enter(StoreOp::Create, record.record_id.to_string()).await;
        self.take_fault(StoreOp::Create, Some(&record.record_id))?;

        let id = self.insert(record)?;
        self.objects
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn patch(
        &self,
        id: &StoreId,
        patch: RecordPatch,
    ) -> Result<ExistingRecord, StoreError> {
        let _guard = self.enter(StoreOp::Patch, id.to_string()).await;
        self.take_fault(StoreOp::Patch, self.record_id_of(id).as_ref())?;

        let mut entry = self.objects.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        patch.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn delete(&self, id: &StoreId) -> Result<(), StoreError> {
        let _guard = self.enter(StoreOp::Delete, id.to_string()).await;
        self.take_fault(StoreOp::Delete, self.record_id_of(id).as_ref())?;

        let (_, removed) = self.objects.remove(id).ok_or(StoreError::NotFound(*id))?;
        self.index.remove_if(&removed.record_id, |_, stored| stored == id);
        Ok(())
    }
}
