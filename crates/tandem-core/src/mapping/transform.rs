//! Rename and value-convention passes of the field mapper.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value;

use super::complex::coerce_bool;
use crate::models::{Record, System};
use crate::util::to_snake_case;

/// Frappe bookkeeping that has no meaning outside Frappe
pub const FRAPPE_INTERNAL_FIELDS: &[&str] = &[
    "_assign",
    "__islocal",
    "__unsaved",
    "__user_tags",
    "__comments",
    "_user_tags",
    "_comments",
];

const TIMESTAMP_FIELDS: &[&str] = &["created_at", "updated_at", "creation", "modified"];
const BOOLEAN_FIELDS: &[&str] = &["disabled", "enabled", "active", "inactive", "verified"];

const FRAPPE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn strip_internal_fields(data: &mut Record) {
    data.retain(|key, _| !FRAPPE_INTERNAL_FIELDS.contains(&key.as_str()));
}

/// Build the output record from renames plus complex-rule outputs.
///
/// For each `source -> target` rename, a complex output stored under
/// `target` takes precedence over the raw source value. A null produced by
/// a complex rule is dropped instead of emitted. Complex outputs that no
/// rename consumed are emitted under their own name, except a `name`
/// headed for Frappe, where the document name is assigned by Frappe.
pub fn apply_renames(
    data: &Record,
    renames: &IndexMap<String, String>,
    complex_outputs: &[String],
    target: System,
) -> Record {
    let produced: HashSet<&str> = complex_outputs.iter().map(String::as_str).collect();
    let mut mapped = Record::new();

    for (source_field, target_field) in renames.iter() {
        let value = if produced.contains(target_field.as_str()) {
            data.get(target_field.as_str())
        } else {
            data.get(source_field.as_str())
        };
        let Some(value) = value else {
            continue;
        };
        let from_rule =
            produced.contains(target_field.as_str()) || produced.contains(source_field.as_str());
        if from_rule && value.is_null() {
            tracing::warn!(
                field = %target_field,
                "Skipping field whose complex mapping produced no value"
            );
            continue;
        }
        mapped.insert(target_field.clone(), value.clone());
    }

    for field in complex_outputs {
        if mapped.contains_key(field) || renames.contains_key(field) {
            continue;
        }
        if field == "name" && target == System::Frappe {
            continue;
        }
        match data.get(field) {
            Some(Value::Null) => {
                tracing::warn!(field = %field, "Skipping field whose complex mapping produced no value");
            }
            Some(value) => {
                mapped.insert(field.clone(), value.clone());
            }
            None => {}
        }
    }

    mapped
}

/// Target-system conventions: timestamp format, boolean fields, empty
/// values and snake_case keys.
pub fn apply_system_transforms(mapped: Record, target: System) -> Record {
    let mut transformed = Record::new();
    for (key, value) in mapped {
        let value = if TIMESTAMP_FIELDS.contains(&key.as_str()) {
            match convert_timestamp(&value, target) {
                Ok(converted) => converted,
                Err(reason) => {
                    tracing::warn!(field = %key, %reason, "Failed to transform timestamp field");
                    value
                }
            }
        } else if BOOLEAN_FIELDS.contains(&key.as_str()) {
            coerce_bool(&value).map_or(value, Value::Bool)
        } else {
            value
        };

        let value = match (target, value) {
            (System::Supabase, Value::String(text)) if text.is_empty() => Value::Null,
            (System::Frappe, Value::Null) => Value::String(String::new()),
            (_, value) => value,
        };

        transformed.insert(to_snake_case(&key), value);
    }
    transformed
}

/// ISO 8601 toward Supabase, `YYYY-MM-DD HH:MM:SS` toward Frappe.
fn convert_timestamp(value: &Value, target: System) -> Result<Value, String> {
    let Some(text) = value.as_str().map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(value.clone());
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(Value::String(match target {
            System::Supabase => parsed.to_rfc3339(),
            System::Frappe => parsed.naive_local().format(FRAPPE_DATETIME).to_string(),
        }));
    }

    if let Some(parsed) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Ok(Value::String(match target {
            System::Supabase => parsed.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            System::Frappe => parsed.format(FRAPPE_DATETIME).to_string(),
        }));
    }

    if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
        return Ok(value.clone());
    }

    Err(format!("unrecognised timestamp {text}"))
}
