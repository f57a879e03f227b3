//! Testing utilities for the recon workspace
//!
//! Shared fixtures, a seeded store helper, and a probe reconciler that
//! records concurrency and call ordering.

#![allow(missing_docs)]

use parking_lot::Mutex;
use recon_core::{
    DesiredRecord, NewRecord, Params, ReconcileError, ReconciliationOutcome, Reconciler,
    RecordAction, RecordId, RecordKind, StoreId,
};
use recon_store::InMemoryRecordStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn action(connector_id: &str) -> RecordAction {
    RecordAction::new("default", connector_id, ".email")
        .with_params(serde_json::json!({ "to": ["soc@example.com"] }))
}

pub fn desired(record_id: &str, kind: &str) -> DesiredRecord {
    DesiredRecord::new(record_id, kind)
}

pub fn stored(record_id: &str, kind: &str, enabled: bool, actions: Vec<RecordAction>) -> NewRecord {
    NewRecord {
        record_id: RecordId::new(record_id),
        kind: RecordKind::new(kind),
        enabled,
        actions,
        params: Params::new(),
    }
}

/// `count` desired records with ids `rule-000`, `rule-001`, ...
pub fn numbered(count: usize, kind: &str) -> Vec<DesiredRecord> {
    (0..count)
        .map(|i| desired(&format!("rule-{i:03}"), kind))
        .collect()
}

/// `count` stored records matching `numbered`
pub fn numbered_stored(count: usize, kind: &str) -> Vec<NewRecord> {
    (0..count)
        .map(|i| stored(&format!("rule-{i:03}"), kind, true, vec![action("c1")]))
        .collect()
}

/// Store holding `records`; panics if two share a record id
pub fn seeded_store(records: Vec<NewRecord>) -> Arc<InMemoryRecordStore> {
    let store = Arc::new(InMemoryRecordStore::new());
    if let Err(e) = store.seed(records) {
        panic!("fixture records conflict: {e}");
    }
    store
}

/// Start or finish of one probe invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Start(RecordId),
    Finish(RecordId),
}

/// Reconciler that reports success after a delay and tracks concurrency
#[derive(Debug, Default)]
pub struct ProbeReconciler {
    delay: Duration,
    failing: HashSet<RecordId>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<ProbeEvent>>,
}

impl ProbeReconciler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail these record ids with `NotFound`
    pub fn failing<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing = ids.into_iter().map(RecordId::new).collect();
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    pub fn started(&self) -> Vec<RecordId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProbeEvent::Start(id) => Some(id.clone()),
                ProbeEvent::Finish(_) => None,
            })
            .collect()
    }

    /// Position of an event in the log
    pub fn position(&self, event: &ProbeEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    async fn run(&self, desired: &DesiredRecord, created: bool) -> ReconciliationOutcome {
        let record_id = desired.record_id.clone();
        self.events.lock().push(ProbeEvent::Start(record_id.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(ProbeEvent::Finish(record_id.clone()));

        if self.failing.contains(&record_id) {
            return ReconciliationOutcome::failed(
                record_id.clone(),
                ReconcileError::NotFound { record_id },
            );
        }
        if created {
            ReconciliationOutcome::Created {
                record_id,
                id: StoreId::new(),
            }
        } else {
            ReconciliationOutcome::Patched {
                record_id,
                id: StoreId::new(),
            }
        }
    }
}

#[async_trait::async_trait]
impl Reconciler for ProbeReconciler {
    async fn update(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        self.run(desired, false).await
    }

    async fn install(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        self.run(desired, true).await
    }
}
