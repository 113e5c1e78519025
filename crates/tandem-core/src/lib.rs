//! tandem-core - Core library for tandem
//!
//! Keeps a Frappe document store and a Supabase backend consistent in both
//! directions. This crate holds the sync engine and everything it leans on:
//! identity normalization, field mapping, webhook deduplication, conflict
//! resolution, the durable retry queue, and the REST adapters for both sides.

pub mod client;
pub mod config;
pub mod conflict;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod models;
pub mod queue;
pub mod retry;
pub mod store;
pub mod util;

pub use engine::{SyncEngine, SyncOutcome};
pub use error::{Error, Result};
pub use models::{
    ChangeEvent, Direction, Operation, OperationId, Record, SyncConflict, SyncOperation, System,
};
