//! Reconciliation planner
//!
//! Converges one stored record onto its desired definition:
//! - Same kind: patch in place, leaving enabled/actions to the store
//! - Kind changed: delete, then recreate carrying enabled/actions forward
//!
//! The decision itself (`decide`) is pure; `ReconciliationPlanner` wraps it
//! with the store reads and writes. The planner keeps no state between
//! calls, so distinct record ids can be reconciled concurrently.

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, StoreOp};
use crate::store::RecordStore;
use crate::types::{
    DesiredRecord, ExistingRecord, NewRecord, Params, PlannedAction, ReconciliationOutcome,
    RecordPatch,
};
use std::sync::Arc;

/// Per-record reconciliation entry points driven by the scheduler
///
/// Implementations report failures through `ReconciliationOutcome::Failed`
/// rather than panicking, so sibling records are never affected.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync {
    /// Converge an existing record onto `desired`
    async fn update(&self, desired: &DesiredRecord) -> ReconciliationOutcome;

    /// Create a record that is not stored yet
    async fn install(&self, desired: &DesiredRecord) -> ReconciliationOutcome;
}

/// Decide how to converge `existing` onto `desired`
///
/// `preserved_params` are param keys that, like `enabled` and `actions`,
/// keep their stored value on either path.
#[must_use]
pub fn decide(
    desired: &DesiredRecord,
    existing: &ExistingRecord,
    preserved_params: &[String],
) -> PlannedAction {
    if desired.kind == existing.kind {
        let params: Params = desired
            .params
            .iter()
            .filter(|&(key, _)| !preserved_params.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        return PlannedAction::Patch {
            id: existing.id,
            patch: RecordPatch {
                enabled: None,
                actions: None,
                params,
            },
        };
    }

    let mut params = desired.params.clone();
    for key in preserved_params {
        if let Some(value) = existing.params.get(key) {
            params.insert(key.clone(), value.clone());
        }
    }

    PlannedAction::Replace {
        previous: existing.id,
        record: NewRecord {
            record_id: desired.record_id.clone(),
            kind: desired.kind.clone(),
            enabled: existing.enabled,
            actions: existing.actions.clone(),
            params,
        },
    }
}

/// Store-backed planner
#[derive(Clone)]
pub struct ReconciliationPlanner {
    store: Arc<dyn RecordStore>,
    preserved_params: Vec<String>,
}

impl std::fmt::Debug for ReconciliationPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationPlanner")
            .field("preserved_params", &self.preserved_params)
            .finish_non_exhaustive()
    }
}

impl ReconciliationPlanner {
    /// Create planner over a store
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            preserved_params: Vec::new(),
        }
    }

    /// Create planner using the preserved params of `config`
    #[inline]
    #[must_use]
    pub fn from_config(store: Arc<dyn RecordStore>, config: &ReconcileConfig) -> Self {
        Self::new(store).with_preserved_params(config.preserved_params.clone())
    }

    /// With extra preserved param keys
    #[inline]
    #[must_use]
    pub fn with_preserved_params(mut self, keys: Vec<String>) -> Self {
        self.preserved_params = keys;
        self
    }

    /// Param keys preserved in addition to enabled/actions
    #[inline]
    #[must_use]
    pub fn preserved_params(&self) -> &[String] {
        &self.preserved_params
    }

    /// Reconcile one record, reporting failure as an outcome
    pub async fn plan(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        let outcome = match self.try_plan(desired).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(record_id = %desired.record_id, %error, "reconciliation failed");
                ReconciliationOutcome::failed(desired.record_id.clone(), error)
            }
        };
        record_metric("update", &outcome);
        outcome
    }

    /// Reconcile one record
    ///
    /// # Errors
    /// - `ReconcileError::NotFound` if nothing is stored for the record id;
    ///   no write is issued in that case
    /// - `ReconcileError::Store` if a store call fails
    /// - `ReconcileError::ReplaceIncomplete` if a replace lost the record
    pub async fn try_plan(
        &self,
        desired: &DesiredRecord,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let action = self.preview(desired).await?;
        self.apply(desired, action).await
    }

    /// Read the stored record and decide, without writing anything
    ///
    /// # Errors
    /// `ReconcileError::NotFound` or `ReconcileError::Store` from the read
    pub async fn preview(&self, desired: &DesiredRecord) -> Result<PlannedAction, ReconcileError> {
        let existing = self.fetch(desired).await?;
        Ok(decide(desired, &existing, &self.preserved_params))
    }

    /// Install one record, reporting failure as an outcome
    pub async fn plan_install(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        let outcome = match self.try_install(desired).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(record_id = %desired.record_id, %error, "install failed");
                ReconciliationOutcome::failed(desired.record_id.clone(), error)
            }
        };
        record_metric("install", &outcome);
        outcome
    }

    /// Install one record
    ///
    /// # Errors
    /// - `ReconcileError::AlreadyExists` if the record id is already stored
    /// - `ReconcileError::Store` if a store call fails
    pub async fn try_install(
        &self,
        desired: &DesiredRecord,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let record_id = &desired.record_id;
        let existing = self
            .store
            .read(record_id)
            .await
            .map_err(|e| ReconcileError::store(record_id.clone(), StoreOp::Read, e))?;

        if let Some(existing) = existing {
            return Err(ReconcileError::AlreadyExists {
                record_id: record_id.clone(),
                id: existing.id,
            });
        }

        let created = self
            .store
            .create(NewRecord::from(desired))
            .await
            .map_err(|e| ReconcileError::store(record_id.clone(), StoreOp::Create, e))?;

        tracing::debug!(%record_id, id = %created.id, "created record");
        Ok(ReconciliationOutcome::Created {
            record_id: record_id.clone(),
            id: created.id,
        })
    }

    async fn fetch(&self, desired: &DesiredRecord) -> Result<ExistingRecord, ReconcileError> {
        self.store
            .read(&desired.record_id)
            .await
            .map_err(|e| ReconcileError::store(desired.record_id.clone(), StoreOp::Read, e))?
            .ok_or_else(|| ReconcileError::NotFound {
                record_id: desired.record_id.clone(),
            })
    }

    async fn apply(
        &self,
        desired: &DesiredRecord,
        action: PlannedAction,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let record_id = &desired.record_id;

        match action {
            PlannedAction::Patch { id, patch } => {
                let patched = self
                    .store
                    .patch(&id, patch)
                    .await
                    .map_err(|e| ReconcileError::store(record_id.clone(), StoreOp::Patch, e))?;

                tracing::debug!(%record_id, %id, revision = patched.revision, "patched record");
                Ok(ReconciliationOutcome::Patched {
                    record_id: record_id.clone(),
                    id: patched.id,
                })
            }
            PlannedAction::Replace { previous, record } => {
                tracing::info!(
                    %record_id,
                    %previous,
                    kind = %record.kind,
                    "record kind changed, replacing"
                );

                self.store
                    .delete(&previous)
                    .await
                    .map_err(|e| ReconcileError::store(record_id.clone(), StoreOp::Delete, e))?;

                let created = match self.store.create(record).await {
                    Ok(created) => created,
                    Err(source) => {
                        tracing::error!(
                            %record_id,
                            %previous,
                            %source,
                            "record deleted but replacement could not be created"
                        );
                        return Err(ReconcileError::ReplaceIncomplete {
                            record_id: record_id.clone(),
                            deleted: previous,
                            source,
                        });
                    }
                };

                Ok(ReconciliationOutcome::Replaced {
                    record_id: record_id.clone(),
                    previous,
                    id: created.id,
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl Reconciler for ReconciliationPlanner {
    async fn update(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        self.plan(desired).await
    }

    async fn install(&self, desired: &DesiredRecord) -> ReconciliationOutcome {
        self.plan_install(desired).await
    }
}

fn record_metric(op: &'static str, outcome: &ReconciliationOutcome) {
    metrics::counter!("recon_records_total", "op" => op, "outcome" => outcome.label())
        .increment(1);
}
