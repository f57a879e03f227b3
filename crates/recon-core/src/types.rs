//! Core types for reconciliation
//!
//! Defines the records that flow through the planner and the store:
//! - Identifiers (stable record ids and store-assigned object ids)
//! - Desired and existing record shapes
//! - Store payloads (create and patch)
//! - Per-record outcomes and planned actions

use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Free-form record parameters
pub type Params = Map<String, Value>;

/// Stable external record identifier
///
/// Survives a replace: the deleted and the recreated object share it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create record id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Store-assigned object identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub Ulid);

impl StoreId {
    /// Generate new store id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record type discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(pub String);

impl RecordKind {
    /// Create kind
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for RecordKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

/// Side-effect handler attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAction {
    /// Trigger group the action fires for
    pub group: String,
    /// Connector the action runs through
    pub connector_id: String,
    /// Connector type
    pub action_type_id: String,
    /// Connector parameters
    #[serde(default)]
    pub params: Value,
}

impl RecordAction {
    /// Create action with empty params
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        connector_id: impl Into<String>,
        action_type_id: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            connector_id: connector_id.into(),
            action_type_id: action_type_id.into(),
            params: Value::Null,
        }
    }

    /// With params
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Target-state definition supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredRecord {
    /// Stable identifier
    pub record_id: RecordId,
    /// Type discriminator
    pub kind: RecordKind,
    /// Requested enabled state (only honoured on install)
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Requested actions (only honoured on install)
    #[serde(default)]
    pub actions: Vec<RecordAction>,
    /// Remaining payload
    #[serde(default)]
    pub params: Params,
}

impl DesiredRecord {
    /// Create desired record with no payload
    #[must_use]
    pub fn new(record_id: impl Into<RecordId>, kind: impl Into<RecordKind>) -> Self {
        Self {
            record_id: record_id.into(),
            kind: kind.into(),
            enabled: None,
            actions: Vec::new(),
            params: Params::new(),
        }
    }

    /// With enabled
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// With actions
    #[inline]
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<RecordAction>) -> Self {
        self.actions = actions;
        self
    }

    /// With a single param
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Record currently held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRecord {
    /// Store object id
    pub id: StoreId,
    /// Stable identifier
    pub record_id: RecordId,
    /// Type discriminator
    pub kind: RecordKind,
    /// Whether the record is active
    pub enabled: bool,
    /// Attached side-effect handlers
    pub actions: Vec<RecordAction>,
    /// Remaining payload
    pub params: Params,
    /// Monotonic revision, bumped on every patch
    pub revision: u64,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

/// Payload for `RecordStore::create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Stable identifier
    pub record_id: RecordId,
    /// Type discriminator
    pub kind: RecordKind,
    /// Whether the record is active
    #[serde(default)]
    pub enabled: bool,
    /// Attached side-effect handlers
    #[serde(default)]
    pub actions: Vec<RecordAction>,
    /// Remaining payload
    #[serde(default)]
    pub params: Params,
}

impl NewRecord {
    /// Materialize as a stored record under `id`
    #[must_use]
    pub fn into_existing(self, id: StoreId) -> ExistingRecord {
        ExistingRecord {
            id,
            record_id: self.record_id,
            kind: self.kind,
            enabled: self.enabled,
            actions: self.actions,
            params: self.params,
            revision: 1,
            updated_at: Utc::now(),
        }
    }
}

impl From<&DesiredRecord> for NewRecord {
    fn from(desired: &DesiredRecord) -> Self {
        Self {
            record_id: desired.record_id.clone(),
            kind: desired.kind.clone(),
            enabled: desired.enabled.unwrap_or(false),
            actions: desired.actions.clone(),
            params: desired.params.clone(),
        }
    }
}

/// Payload for `RecordStore::patch`
///
/// `None` leaves the stored value untouched; `params` merge key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New enabled state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// New actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<RecordAction>>,
    /// Params to overwrite
    #[serde(default)]
    pub params: Params,
}

impl RecordPatch {
    /// Apply to a stored record in place
    pub fn apply_to(self, record: &mut ExistingRecord) {
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(actions) = self.actions {
            record.actions = actions;
        }
        record.params.extend(self.params);
        record.revision += 1;
        record.updated_at = Utc::now();
    }
}

/// What the planner decided for one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Same kind: patch in place
    Patch {
        /// Object to patch
        id: StoreId,
        /// Patch payload
        patch: RecordPatch,
    },
    /// Kind changed: delete then recreate
    Replace {
        /// Object to delete
        previous: StoreId,
        /// Replacement payload
        record: NewRecord,
    },
}

/// Result of processing one record
#[derive(Debug, Clone)]
pub enum ReconciliationOutcome {
    /// Record did not exist and was created
    Created {
        /// Stable identifier
        record_id: RecordId,
        /// New object id
        id: StoreId,
    },
    /// Record was patched in place
    Patched {
        /// Stable identifier
        record_id: RecordId,
        /// Patched object id
        id: StoreId,
    },
    /// Record was deleted and recreated under a new object id
    Replaced {
        /// Stable identifier
        record_id: RecordId,
        /// Deleted object id
        previous: StoreId,
        /// New object id
        id: StoreId,
    },
    /// Reconciliation failed for this record
    Failed {
        /// Stable identifier
        record_id: RecordId,
        /// Cause
        error: ReconcileError,
    },
}

impl ReconciliationOutcome {
    /// Stable identifier of the record this outcome belongs to
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Created { record_id, .. }
            | Self::Patched { record_id, .. }
            | Self::Replaced { record_id, .. }
            | Self::Failed { record_id, .. } => record_id,
        }
    }

    /// Check if this outcome is a failure
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Error, if failed
    #[must_use]
    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Short status label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Patched { .. } => "patched",
            Self::Replaced { .. } => "replaced",
            Self::Failed { .. } => "failed",
        }
    }

    /// Object id the record lives under afterwards
    #[must_use]
    pub fn store_id(&self) -> Option<StoreId> {
        match self {
            Self::Created { id, .. } | Self::Patched { id, .. } | Self::Replaced { id, .. } => {
                Some(*id)
            }
            Self::Failed { .. } => None,
        }
    }

    /// Build a failed outcome
    #[inline]
    #[must_use]
    pub fn failed(record_id: RecordId, error: ReconcileError) -> Self {
        Self::Failed { record_id, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored() -> ExistingRecord {
        NewRecord {
            record_id: RecordId::new("r1"),
            kind: RecordKind::new("query"),
            enabled: true,
            actions: vec![RecordAction::new("default", "c1", ".email")],
            params: Params::new(),
        }
        .into_existing(StoreId::new())
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let mut record = stored();
        let mut params = Params::new();
        params.insert("severity".to_string(), json!("high"));

        RecordPatch {
            enabled: None,
            actions: None,
            params,
        }
        .apply_to(&mut record);

        assert!(record.enabled);
        assert_eq!(record.actions.len(), 1);
        assert_eq!(record.params["severity"], json!("high"));
        assert_eq!(record.revision, 2);
    }

    #[test]
    fn patch_overwrites_set_fields() {
        let mut record = stored();
        RecordPatch {
            enabled: Some(false),
            actions: Some(Vec::new()),
            params: Params::new(),
        }
        .apply_to(&mut record);

        assert!(!record.enabled);
        assert!(record.actions.is_empty());
    }

    #[test]
    fn new_record_from_desired_defaults_to_disabled() {
        let desired = DesiredRecord::new("r9", "eql");
        let record = NewRecord::from(&desired);
        assert!(!record.enabled);
        assert_eq!(record.kind.as_str(), "eql");
    }

    #[test]
    fn desired_record_deserializes_with_defaults() {
        let desired: DesiredRecord =
            serde_json::from_value(json!({ "record_id": "r1", "kind": "query" })).unwrap();
        assert_eq!(desired.record_id, RecordId::new("r1"));
        assert!(desired.enabled.is_none());
        assert!(desired.params.is_empty());
    }

    #[test]
    fn outcome_accessors() {
        let id = StoreId::new();
        let outcome = ReconciliationOutcome::Patched {
            record_id: RecordId::new("r1"),
            id,
        };
        assert_eq!(outcome.label(), "patched");
        assert_eq!(outcome.store_id(), Some(id));
        assert!(!outcome.is_failure());

        let failed = ReconciliationOutcome::failed(
            RecordId::new("r2"),
            ReconcileError::NotFound {
                record_id: RecordId::new("r2"),
            },
        );
        assert!(failed.is_failure());
        assert_eq!(failed.record_id().as_str(), "r2");
        assert!(failed.store_id().is_none());
    }
}
