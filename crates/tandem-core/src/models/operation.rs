//! Sync operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ChangeEvent, Direction, EventId, Operation, Record, System};

/// A unique identifier for a sync operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a single operation inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A unit of work derived from a [`ChangeEvent`].
///
/// The operation owns its own copy of the event payload. Attempts re-read
/// `payload` and never write to it, so a retry always starts from the data
/// the webhook delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    pub event_id: EventId,
    pub direction: Direction,
    pub source_system: System,
    pub target_system: System,
    pub record_type: String,
    /// Collection written to in the target system
    pub target_collection: String,
    pub record_id: String,
    pub operation: Operation,
    pub payload: Record,
    pub status: OperationStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix ms
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl SyncOperation {
    /// Build a pending operation for `event`, deep-copying its data.
    #[must_use]
    pub fn from_event(
        event: &ChangeEvent,
        direction: Direction,
        operation: Operation,
        target_collection: impl Into<String>,
    ) -> Self {
        let now = crate::util::unix_timestamp_millis();
        Self {
            id: OperationId::new(),
            event_id: event.id.clone(),
            direction,
            source_system: direction.source(),
            target_system: direction.target(),
            record_type: event.record_type.clone(),
            target_collection: target_collection.into(),
            record_id: event.record_id.clone(),
            operation,
            payload: event.data.clone(),
            status: OperationStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = OperationStatus::InProgress;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.status = OperationStatus::Completed;
        self.error_message = None;
        self.touch();
        self.completed_at = Some(self.updated_at);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.error_message = Some(error.into());
        self.touch();
    }

    /// Count a failed attempt, keeping the latest error
    pub fn record_attempt_failure(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = crate::util::unix_timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> ChangeEvent {
        let data = json!({"name": "HR-EMP-0001", "cell_number": "999-888-7777"});
        ChangeEvent::new(
            System::Frappe,
            "Employee",
            "HR-EMP-0001",
            Operation::Update,
            data.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn payload_is_an_independent_copy() {
        let event = event();
        let mut op = SyncOperation::from_event(
            &event,
            Direction::FrappeToSupabase,
            Operation::Update,
            "users",
        );
        op.payload.insert("cell_number".into(), json!("changed"));

        assert_eq!(event.data["cell_number"], json!("999-888-7777"));
        assert_eq!(op.source_system, System::Frappe);
        assert_eq!(op.target_system, System::Supabase);
    }

    #[test]
    fn status_transitions_track_errors() {
        let mut op = SyncOperation::from_event(
            &event(),
            Direction::FrappeToSupabase,
            Operation::Create,
            "users",
        );
        op.record_attempt_failure("boom");
        op.record_attempt_failure("boom again");
        assert_eq!(op.retry_count, 2);
        assert_eq!(op.error_message.as_deref(), Some("boom again"));

        op.mark_completed();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(op.error_message.is_none());
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn operation_id_round_trips_through_text() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
