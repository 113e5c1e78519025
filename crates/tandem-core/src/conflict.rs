//! Conflict detection and resolution between an incoming change and the
//! current state of the target record.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::mapping::MappingConfig;
use crate::models::{ConflictStrategy, Direction, OperationId, Record, SyncConflict, System};
use crate::util::scalar_text;

const FRAPPE_MODIFIED_FIELD: &str = "modified";
const SUPABASE_MODIFIED_FIELD: &str = "updated_at";
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Outcome of applying a strategy to a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Payload to write, in the target's vocabulary
    Resolved(Record),
    /// Nothing may be written until an operator decides
    Manual,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compare the mapped payload with the current target record over the
    /// mapping's `sync_fields`.
    ///
    /// `source_payload` is the change as the source system reported it and
    /// `current` is the target record; both are kept on the conflict as the
    /// two sides' raw data. Returns `None` when every compared field agrees.
    #[must_use]
    pub fn detect(
        &self,
        operation_id: OperationId,
        direction: Direction,
        mapped: &Record,
        source_payload: &Record,
        current: &Record,
        config: &MappingConfig,
    ) -> Option<SyncConflict> {
        let renames = config.renames(direction);
        let mut conflict_fields = Vec::new();

        for field in &config.sync_fields {
            let target_field = renames.get(field).map_or(field.as_str(), String::as_str);
            let (Some(incoming), Some(existing)) = (mapped.get(target_field), current.get(target_field))
            else {
                continue;
            };
            if incoming.is_null() || existing.is_null() {
                continue;
            }
            if !values_agree(incoming, existing) && !conflict_fields.iter().any(|f| f == target_field) {
                conflict_fields.push(target_field.to_string());
            }
        }

        if conflict_fields.is_empty() {
            return None;
        }

        let (frappe_data, supabase_data) = match direction.source() {
            System::Frappe => (source_payload.clone(), current.clone()),
            System::Supabase => (current.clone(), source_payload.clone()),
        };
        tracing::info!(
            %operation_id,
            %direction,
            fields = ?conflict_fields,
            strategy = %config.conflict_resolution,
            "Conflict detected"
        );
        Some(SyncConflict::new(
            operation_id,
            frappe_data,
            supabase_data,
            conflict_fields,
            config.conflict_resolution,
        ))
    }

    /// Apply the conflict's strategy.
    ///
    /// When the source side wins the mapped payload is written as is. When
    /// the target side wins, the conflicting fields keep the target's
    /// current values and everything else still flows from the source.
    pub fn resolve(
        &self,
        conflict: &mut SyncConflict,
        direction: Direction,
        mapped: &Record,
        current: &Record,
    ) -> Resolution {
        let winner = match conflict.strategy {
            ConflictStrategy::Manual => {
                conflict.require_manual();
                tracing::warn!(conflict_id = %conflict.id, "Conflict requires manual resolution");
                return Resolution::Manual;
            }
            ConflictStrategy::FrappeWins => System::Frappe,
            ConflictStrategy::SupabaseWins => System::Supabase,
            ConflictStrategy::LastModifiedWins => {
                last_modified_winner(&conflict.frappe_data, &conflict.supabase_data)
            }
        };

        let mut resolved = mapped.clone();
        if winner == direction.target() {
            for field in &conflict.conflict_fields {
                if let Some(value) = current.get(field) {
                    resolved.insert(field.clone(), value.clone());
                }
            }
        }

        tracing::info!(
            conflict_id = %conflict.id,
            strategy = %conflict.strategy,
            winner = %winner,
            "Conflict resolved"
        );
        conflict.resolve(resolved.clone());
        Resolution::Resolved(resolved)
    }
}

fn values_agree(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (scalar_text(left), scalar_text(right)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

/// Later modification wins. A tie, or no timestamp on either side, goes to
/// Supabase; a single timestamp wins over none.
fn last_modified_winner(frappe_data: &Record, supabase_data: &Record) -> System {
    let frappe = frappe_data.get(FRAPPE_MODIFIED_FIELD).and_then(scalar_text);
    let supabase = supabase_data.get(SUPABASE_MODIFIED_FIELD).and_then(scalar_text);

    match (frappe, supabase) {
        (Some(frappe), Some(supabase)) => {
            if compare_timestamps(&frappe, &supabase) == Ordering::Greater {
                System::Frappe
            } else {
                System::Supabase
            }
        }
        (Some(_), None) => System::Frappe,
        (None, _) => System::Supabase,
    }
}

fn compare_timestamps(left: &str, right: &str) -> Ordering {
    match (parse_timestamp(left), parse_timestamp(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

/// Offset timestamps are compared in UTC; naive ones as written.
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}
