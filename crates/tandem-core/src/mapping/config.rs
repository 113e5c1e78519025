//! Mapping documents: how one record type travels between the two systems.
//!
//! Rename tables and complex rules are [`IndexMap`]s: rules run in the order
//! they are declared and renames are emitted in the same order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::complex::ComplexMapping;
use crate::error::{Error, Result};
use crate::models::{ConflictStrategy, Direction, System};

/// Which directions a mapping may carry changes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    #[default]
    Bidirectional,
    FrappeToSupabase,
    SupabaseToFrappe,
}

impl DirectionPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bidirectional => "bidirectional",
            Self::FrappeToSupabase => "frappe_to_supabase",
            Self::SupabaseToFrappe => "supabase_to_frappe",
        }
    }

    #[must_use]
    pub fn allows(self, direction: Direction) -> bool {
        match self {
            Self::Bidirectional => true,
            Self::FrappeToSupabase => direction == Direction::FrappeToSupabase,
            Self::SupabaseToFrappe => direction == Direction::SupabaseToFrappe,
        }
    }
}

fn default_primary_key() -> String {
    "name".to_string()
}

const fn default_enabled() -> bool {
    true
}

/// Mapping for one record type, as stored in the mapping store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub frappe_doctype: String,
    #[serde(default)]
    pub supabase_table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Fields compared when checking for conflicts
    #[serde(default)]
    pub sync_fields: Vec<String>,
    #[serde(default)]
    pub direction: DirectionPolicy,
    #[serde(default)]
    pub conflict_resolution: ConflictStrategy,
    /// Frappe field -> Supabase column
    #[serde(default)]
    pub field_mappings: IndexMap<String, String>,
    /// Supabase column -> Frappe field
    #[serde(default)]
    pub reverse_mappings: IndexMap<String, String>,
    #[serde(default)]
    pub complex_mappings: IndexMap<String, ComplexMapping>,
    #[serde(default)]
    pub reverse_complex_mappings: IndexMap<String, ComplexMapping>,
    /// Target-side field used to find the record to delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MappingConfig {
    #[must_use]
    pub fn new(frappe_doctype: impl Into<String>, supabase_table: impl Into<String>) -> Self {
        Self {
            frappe_doctype: frappe_doctype.into(),
            supabase_table: supabase_table.into(),
            primary_key: default_primary_key(),
            sync_fields: Vec::new(),
            direction: DirectionPolicy::default(),
            conflict_resolution: ConflictStrategy::default(),
            field_mappings: IndexMap::new(),
            reverse_mappings: IndexMap::new(),
            complex_mappings: IndexMap::new(),
            reverse_complex_mappings: IndexMap::new(),
            delete_key: None,
            enabled: true,
        }
    }

    /// Rename table for `direction`
    #[must_use]
    pub const fn renames(&self, direction: Direction) -> &IndexMap<String, String> {
        match direction {
            Direction::FrappeToSupabase => &self.field_mappings,
            Direction::SupabaseToFrappe => &self.reverse_mappings,
        }
    }

    #[must_use]
    pub const fn complex_rules(&self, direction: Direction) -> &IndexMap<String, ComplexMapping> {
        match direction {
            Direction::FrappeToSupabase => &self.complex_mappings,
            Direction::SupabaseToFrappe => &self.reverse_complex_mappings,
        }
    }

    /// Doctype or table name on `system`'s side
    #[must_use]
    pub fn collection(&self, system: System) -> &str {
        match system {
            System::Frappe => &self.frappe_doctype,
            System::Supabase => &self.supabase_table,
        }
    }

    #[must_use]
    pub fn allows(&self, direction: Direction) -> bool {
        self.direction.allows(direction)
    }

    /// Reject documents the engine could not execute.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.frappe_doctype.trim().is_empty() {
            problems.push("frappe_doctype is required".to_string());
        }
        if self.supabase_table.trim().is_empty() {
            problems.push("supabase_table is required".to_string());
        }
        if self.allows(Direction::FrappeToSupabase) && self.field_mappings.is_empty() {
            problems.push("field_mappings must not be empty".to_string());
        }
        if self.allows(Direction::SupabaseToFrappe) && self.reverse_mappings.is_empty() {
            problems.push("reverse_mappings must not be empty".to_string());
        }
        for (field, target) in self.field_mappings.iter().chain(self.reverse_mappings.iter()) {
            if field.trim().is_empty() || target.trim().is_empty() {
                problems.push("field mapping names must not be blank".to_string());
                break;
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn deserializes_with_defaults_and_keeps_order() {
        let config: MappingConfig = serde_json::from_value(json!({
            "frappe_doctype": "Employee",
            "supabase_table": "users",
            "field_mappings": {"first_name": "first_name", "cell_number": "phone_number", "company": "organization_id"},
            "reverse_mappings": {"phone_number": "cell_number"}
        }))
        .unwrap();

        assert_eq!(config.primary_key, "name");
        assert!(config.enabled);
        assert_eq!(config.direction, DirectionPolicy::Bidirectional);
        assert_eq!(config.conflict_resolution, ConflictStrategy::LastModifiedWins);
        let keys: Vec<&str> = config.field_mappings.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["first_name", "cell_number", "company"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn serialization_round_trip_preserves_document() {
        let document = json!({
            "frappe_doctype": "Task",
            "supabase_table": "tasks",
            "primary_key": "name",
            "sync_fields": ["subject"],
            "direction": "frappe_to_supabase",
            "conflict_resolution": "frappe_wins",
            "field_mappings": {"subject": "task_name", "name": "id"},
            "reverse_mappings": {},
            "complex_mappings": {"name": {"type": "prefix_transform", "prefix": "TASK"}},
            "reverse_complex_mappings": {},
            "enabled": true
        });
        let config: MappingConfig = serde_json::from_value(document).unwrap();
        let back = serde_json::to_value(&config).unwrap();
        let again: MappingConfig = serde_json::from_value(back).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn validation_lists_every_problem() {
        let config = MappingConfig::new("", "users");
        let Err(Error::InvalidInput(message)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert!(message.contains("frappe_doctype is required"));
        assert!(message.contains("field_mappings must not be empty"));
        assert!(message.contains("reverse_mappings must not be empty"));
    }

    #[test]
    fn one_way_mapping_only_needs_its_rename_table() {
        let mut config = MappingConfig::new("Task", "tasks");
        config.direction = DirectionPolicy::FrappeToSupabase;
        config.field_mappings.insert("subject".into(), "task_name".into());
        assert!(config.validate().is_ok());
        assert!(!config.allows(Direction::SupabaseToFrappe));
    }
}
