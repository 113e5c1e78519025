//! Durable queue records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SyncOperation;
use crate::error::Error;

/// Which list of the retry queue an operation sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Pending,
    Processing,
    Failed,
}

impl QueueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!("Unknown queue state: {other}"))),
        }
    }
}

/// An operation as stored in the queue, with its queue bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub operation: SyncOperation,
    pub state: QueueState,
    /// Times the operation was moved from failed back to pending. Inline
    /// attempts count toward `operation.retry_count` only.
    #[serde(default)]
    pub requeue_count: u32,
    /// Unix ms
    pub enqueued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    /// Last time the operation was moved back from failed to pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<i64>,
}

/// Counts per queue list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub total: u64,
}
