//! Structured results of processing one change event.

use serde::Serialize;

use crate::models::{OperationId, Record};

/// Why an event was not synced. These are expected outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DuplicateWebhook,
    OppositeServiceWebhookAfterSync,
    NoMapping,
    MappingDisabled,
    DirectionNotAllowed,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateWebhook => "duplicate_webhook",
            Self::OppositeServiceWebhookAfterSync => "opposite_service_webhook_after_sync",
            Self::NoMapping => "no_mapping",
            Self::MappingDisabled => "mapping_disabled",
            Self::DirectionNotAllowed => "direction_not_allowed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMiss {
    RecordNotFound,
    NoLookupKey,
}

/// What was written to the target system
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WriteResult {
    Created {
        record: Record,
    },
    Updated {
        id: String,
        record: Record,
    },
    Deleted {
        deleted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DeleteMiss>,
    },
}

impl WriteResult {
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }
}

/// Terminal state of one event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped {
        reason: SkipReason,
    },
    Success {
        operation_id: OperationId,
        result: WriteResult,
    },
    Conflict {
        operation_id: OperationId,
        conflict_id: String,
        conflict_fields: Vec<String>,
        requires_manual_resolution: bool,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_id: Option<OperationId>,
        error: String,
    },
}

impl SyncOutcome {
    #[must_use]
    pub const fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
