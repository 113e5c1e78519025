//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{OperationId, Record};

/// How divergent field values are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    LastModifiedWins,
    FrappeWins,
    SupabaseWins,
    Manual,
}

impl ConflictStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastModifiedWins => "last_modified_wins",
            Self::FrappeWins => "frappe_wins",
            Self::SupabaseWins => "supabase_wins",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_modified_wins" => Ok(Self::LastModifiedWins),
            "frappe_wins" => Ok(Self::FrappeWins),
            "supabase_wins" => Ok(Self::SupabaseWins),
            "manual" => Ok(Self::Manual),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown conflict strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
    RequiresManualResolution,
}

/// Field-level divergence between an incoming change and the target record.
/// Lives only for the duration of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict identifier (`conflict_<operation id>`)
    pub id: String,
    pub operation_id: OperationId,
    /// Frappe's side of the record, in Frappe's vocabulary
    pub frappe_data: Record,
    pub supabase_data: Record,
    pub conflict_fields: Vec<String>,
    pub strategy: ConflictStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_data: Option<Record>,
    pub status: ConflictStatus,
    /// Unix ms
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    #[must_use]
    pub fn new(
        operation_id: OperationId,
        frappe_data: Record,
        supabase_data: Record,
        conflict_fields: Vec<String>,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            id: format!("conflict_{operation_id}"),
            operation_id,
            frappe_data,
            supabase_data,
            conflict_fields,
            strategy,
            resolved_data: None,
            status: ConflictStatus::Pending,
            created_at: crate::util::unix_timestamp_millis(),
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, data: Record) {
        self.resolved_data = Some(data);
        self.status = ConflictStatus::Resolved;
        self.resolved_at = Some(crate::util::unix_timestamp_millis());
    }

    pub fn require_manual(&mut self) {
        self.status = ConflictStatus::RequiresManualResolution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_snake_case_names() {
        assert_eq!(
            "supabase_wins".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::SupabaseWins
        );
        assert!("coin_flip".parse::<ConflictStrategy>().is_err());
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::LastModifiedWins);
    }

    #[test]
    fn resolving_records_payload() {
        let mut conflict = SyncConflict::new(
            OperationId::new(),
            Record::new(),
            Record::new(),
            vec!["email".into()],
            ConflictStrategy::FrappeWins,
        );
        assert!(conflict.id.starts_with("conflict_"));
        conflict.resolve(Record::new());
        assert_eq!(conflict.status, ConflictStatus::Resolved);
        assert!(conflict.resolved_at.is_some());
    }
}
