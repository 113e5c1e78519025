//! Data models for tandem

mod conflict;
mod event;
mod operation;
mod queue;
mod system;

pub use conflict::{ConflictStatus, ConflictStrategy, SyncConflict};
pub use event::{ChangeEvent, EventId};
pub use operation::{OperationId, OperationStatus, SyncOperation};
pub use queue::{QueueState, QueueStatus, QueuedOperation};
pub use system::{Direction, Operation, System};

/// A record as exchanged with either system: an insertion-ordered JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;
