//! Record store interface
//!
//! The reconciler never touches stored records directly; every mutation
//! goes through these four calls. Calls are the only suspension points of a
//! reconciliation, and timeouts belong to the implementation.

use crate::error::StoreError;
use crate::types::{ExistingRecord, NewRecord, RecordId, RecordPatch, StoreId};

/// Backing store for records
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the object stored for a record id
    async fn read(&self, record_id: &RecordId) -> Result<Option<ExistingRecord>, StoreError>;

    /// Create a new object
    async fn create(&self, record: NewRecord) -> Result<ExistingRecord, StoreError>;

    /// Patch an object in place
    async fn patch(&self, id: &StoreId, patch: RecordPatch)
        -> Result<ExistingRecord, StoreError>;

    /// Delete an object
    async fn delete(&self, id: &StoreId) -> Result<(), StoreError>;
}
