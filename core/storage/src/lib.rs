//! Record store abstraction for Expensync.
//!
//! This module provides a trait-based interface for the durable storage of
//! expense records and a registry for resolving a store by name.
//!
//! # Design Principles
//! - Async operations: every store method is async
//! - Per-record atomicity: guarded writes check and write in one step
//! - Unified error semantics: every backend reports through the common Error

pub mod memory;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use sqlite::SqliteStore;
pub use store::{RecordStore, UpdateGuard};
