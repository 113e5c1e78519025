//! Inbound change notifications

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Operation, Record, System};

/// Identifier of a change event, as assigned by the intake that built it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Random identifier for events that carry no natural one
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("evt_{}", uuid::Uuid::now_v7().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized change notification from one of the two systems.
///
/// `source` is the system that told us about the change this time;
/// `original_source` is the system where the change first happened. The
/// engine uses the difference between the two to refuse reverse-sync loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: EventId,
    pub source: System,
    pub record_type: String,
    /// Record id as known to `source`
    pub record_id: String,
    pub operation: Operation,
    pub data: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<System>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(
        source: System,
        record_type: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        data: Record,
    ) -> Self {
        Self {
            id: EventId::generate(),
            source,
            record_type: record_type.into(),
            record_id: record_id.into(),
            operation,
            data,
            original_source: None,
            created_at: crate::util::unix_timestamp_millis(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub const fn with_original_source(mut self, origin: System) -> Self {
        self.original_source = Some(origin);
        self
    }
}
