//! In-memory `RecordStore` implementation
//!
//! Used by the `recon` binary to reconcile record sets loaded from files,
//! and by tests that need to observe store traffic.

#![warn(unreachable_pub)]

pub mod journal;
pub mod memory;

pub use journal::{CallJournal, StoreCall};
pub use memory::InMemoryRecordStore;
