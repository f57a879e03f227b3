//! Recon Core - batch record reconciliation
//!
//! Converges a set of stored records onto a set of desired definitions:
//! - Plans each record as an in-place patch or a delete-and-recreate replace
//! - Keeps `enabled`, actions and configured params from the stored record
//! - Runs records in fixed-size concurrent chunks, one chunk at a time
//! - Reports every per-record outcome, failures included
//!
//! # Example
//!
//! ```rust,ignore
//! use recon_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn RecordStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcileConfig::new().with_chunk_size(10)?;
//! let planner = ReconciliationPlanner::from_config(store, &config);
//! let scheduler = BatchScheduler::new(Arc::new(planner), &config);
//!
//! let desired = vec![DesiredRecord::new("rule-1", "query")];
//! let outcomes = scheduler.update(&desired).await.into_result()?;
//! println!("reconciled {} records", outcomes.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod planner;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{FailurePolicy, ReconcileConfig, DEFAULT_CHUNK_SIZE};
pub use error::{ConfigError, ReconcileError, StoreError, StoreOp};
pub use planner::{decide, ReconciliationPlanner, Reconciler};
pub use report::{BatchReport, BatchStats, ChunkSummary};
pub use scheduler::{BatchMode, BatchScheduler};
pub use store::RecordStore;
pub use types::{
    DesiredRecord, ExistingRecord, NewRecord, Params, PlannedAction, ReconciliationOutcome,
    RecordAction, RecordId, RecordKind, RecordPatch, StoreId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running reconciliation batches
    pub use crate::{
        BatchReport, BatchScheduler, DesiredRecord, FailurePolicy, ReconcileConfig,
        ReconcileError, ReconciliationOutcome, ReconciliationPlanner, Reconciler, RecordStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
