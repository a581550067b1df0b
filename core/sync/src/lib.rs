//! Sync engine for Expensync.
//!
//! This module reconciles expense records between the server store and
//! disconnected clients:
//! - Server-changes delta since a client's last sync
//! - Application of queued client changes with conflict detection
//! - Per-change outcomes that never abort the rest of a batch
//! - Plain record operations for the CLI through [`ExpenseService`]

pub mod applier;
pub mod conflict;
pub mod engine;
pub mod protocol;
pub mod service;

pub use applier::{ChangeApplier, MAX_GUARDED_ATTEMPTS};
pub use conflict::{resolve, DeletePolicy, Resolution};
pub use engine::{SyncConfig, SyncEngine};
pub use protocol::{
    BatchEntry, ChangeOutcome, DeleteBaseline, PendingChange, ResultStatus, SyncRequest, SyncResponse,
    SyncResultEntry,
};
pub use service::ExpenseService;
