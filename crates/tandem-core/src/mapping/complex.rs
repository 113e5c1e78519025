//! Per-field transform rules.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Direction, Record, System};
use crate::util::{is_present, scalar_text};

const TRUE_WORDS: &[&str] = &["true", "1", "yes", "on", "active"];
const FALSE_WORDS: &[&str] = &["false", "0", "no", "off", "inactive"];

fn default_result_field() -> String {
    "id".to_string()
}
const fn default_position() -> usize {
    2
}
const fn default_width() -> usize {
    4
}
const fn default_true() -> bool {
    true
}
fn default_first_name_field() -> String {
    "first_name".to_string()
}
fn default_last_name_field() -> String {
    "last_name".to_string()
}
fn default_name_field() -> String {
    "name".to_string()
}
fn default_active_status() -> String {
    "Active".to_string()
}
fn default_inactive_status() -> String {
    "Inactive".to_string()
}

/// What a lookup yields when no record matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMiss {
    /// Pass the source value through unchanged
    #[default]
    Keep,
    /// Emit null, which drops the field from the output
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateInputFormat {
    #[default]
    IsoDatetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOutputFormat {
    #[default]
    DateString,
}

/// A typed transform attached to one field of a mapping.
///
/// The rule is keyed by a field name in the mapping document. Rules that
/// read several fields (name combination, email priority, date fallback)
/// write their result under that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComplexMapping {
    /// Resolve a reference by querying the target system
    Lookup {
        table: String,
        match_field: String,
        #[serde(default = "default_result_field")]
        result_field: String,
        #[serde(default)]
        on_miss: LookupMiss,
    },
    /// `TASK-2025-0007` <-> `7`
    PrefixTransform {
        prefix: String,
        #[serde(default = "default_position")]
        position: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        year: Option<i32>,
        #[serde(default = "default_width")]
        width: usize,
        #[serde(default = "default_true")]
        include_year: bool,
    },
    EmailPriority {
        email_priority: Vec<String>,
    },
    NameCombination {
        #[serde(default = "default_first_name_field")]
        first_name_field: String,
        #[serde(default = "default_last_name_field")]
        last_name_field: String,
    },
    ReverseNameCombination {
        #[serde(default = "default_name_field")]
        source_field: String,
        #[serde(default = "default_first_name_field")]
        first_name_field: String,
        #[serde(default = "default_last_name_field")]
        last_name_field: String,
    },
    StatusMapping {
        #[serde(default = "default_active_status")]
        active_status: String,
        #[serde(default = "default_inactive_status")]
        inactive_status: String,
    },
    #[serde(
        alias = "is_milestone_to_needs_submission",
        alias = "needs_submission_to_is_milestone"
    )]
    Boolean,
    DateFallback {
        primary_field: String,
        fallback_field: String,
    },
    DateFormatConversion {
        #[serde(default)]
        input_format: DateInputFormat,
        #[serde(default)]
        output_format: DateOutputFormat,
    },
    DefaultValue {
        value: Value,
    },
    #[serde(alias = "company_to_org_mapping")]
    StaticMap {
        mappings: serde_json::Map<String, Value>,
    },
    StringToInt,
}

/// Outcome of applying one rule: the fields it wrote.
pub type RuleResult = Result<Vec<String>, String>;

impl ComplexMapping {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Lookup { .. } => "lookup",
            Self::PrefixTransform { .. } => "prefix_transform",
            Self::EmailPriority { .. } => "email_priority",
            Self::NameCombination { .. } => "name_combination",
            Self::ReverseNameCombination { .. } => "reverse_name_combination",
            Self::StatusMapping { .. } => "status_mapping",
            Self::Boolean => "boolean",
            Self::DateFallback { .. } => "date_fallback",
            Self::DateFormatConversion { .. } => "date_format_conversion",
            Self::DefaultValue { .. } => "default_value",
            Self::StaticMap { .. } => "static_map",
            Self::StringToInt => "string_to_int",
        }
    }

    /// Apply a rule that needs no remote access, in place.
    ///
    /// An `Err` leaves `data` untouched; the caller logs it and keeps the
    /// original value. Lookups are resolved by the mapping engine and are a
    /// no-op here.
    pub fn apply_local(&self, field: &str, data: &mut Record, direction: Direction) -> RuleResult {
        let toward_supabase = direction.target() == System::Supabase;
        match self {
            Self::Lookup { .. } => Ok(Vec::new()),
            Self::PrefixTransform {
                prefix,
                position,
                year,
                width,
                include_year,
            } => map_value(field, data, |value| {
                if toward_supabase {
                    parse_prefixed_id(value, prefix, *position)
                } else {
                    format_prefixed_id(value, prefix, *year, *width, *include_year)
                }
            }),
            Self::EmailPriority { email_priority } => {
                if toward_supabase {
                    let chosen = email_priority
                        .iter()
                        .find_map(|candidate| data.get(candidate).filter(|v| is_present(v)))
                        .cloned()
                        .unwrap_or(Value::Null);
                    data.insert(field.to_string(), chosen);
                    Ok(vec![field.to_string()])
                } else {
                    let Some(value) = data.get(field).filter(|v| is_present(v)).cloned() else {
                        return Ok(Vec::new());
                    };
                    for target in email_priority {
                        data.insert(target.clone(), value.clone());
                    }
                    Ok(email_priority.clone())
                }
            }
            Self::NameCombination {
                first_name_field,
                last_name_field,
            } => {
                if toward_supabase {
                    let combined = join_names(data, first_name_field, last_name_field);
                    data.insert(field.to_string(), combined);
                    Ok(vec![field.to_string()])
                } else {
                    let Some(full) = data.get(field).and_then(scalar_text) else {
                        return Ok(Vec::new());
                    };
                    data.shift_remove(field);
                    Ok(split_name(data, &full, first_name_field, last_name_field))
                }
            }
            Self::ReverseNameCombination {
                source_field,
                first_name_field,
                last_name_field,
            } => {
                let Some(full) = data.get(source_field).and_then(scalar_text) else {
                    return Ok(Vec::new());
                };
                Ok(split_name(data, &full, first_name_field, last_name_field))
            }
            Self::StatusMapping {
                active_status,
                inactive_status,
            } => map_value(field, data, |value| {
                if toward_supabase {
                    match value.as_str() {
                        Some(label) if label == active_status.as_str() => Ok(Value::Bool(true)),
                        Some(label) if label == inactive_status.as_str() => Ok(Value::Bool(false)),
                        _ => coerce_bool(value)
                            .map(Value::Bool)
                            .ok_or_else(|| format!("unrecognised status {value}")),
                    }
                } else if is_truthy(value) {
                    Ok(Value::String(active_status.clone()))
                } else {
                    Ok(Value::String(inactive_status.clone()))
                }
            }),
            Self::Boolean => map_value(field, data, |value| {
                if toward_supabase {
                    if value.is_null() {
                        return Ok(Value::Bool(false));
                    }
                    coerce_bool(value)
                        .map(Value::Bool)
                        .ok_or_else(|| format!("not a boolean: {value}"))
                } else {
                    Ok(Value::from(i32::from(is_truthy(value))))
                }
            }),
            Self::DateFallback {
                primary_field,
                fallback_field,
            } => {
                let chosen = [primary_field, fallback_field]
                    .into_iter()
                    .find_map(|candidate| data.get(candidate.as_str()).filter(|v| is_present(v)))
                    .cloned()
                    .unwrap_or(Value::Null);
                data.insert(field.to_string(), chosen);
                Ok(vec![field.to_string()])
            }
            Self::DateFormatConversion { .. } => map_value(field, data, |value| {
                Ok(match value {
                    Value::String(text) => Value::String(
                        text.split_once('T')
                            .map_or_else(|| text.clone(), |(date, _)| date.to_string()),
                    ),
                    other => other.clone(),
                })
            }),
            Self::DefaultValue { value } => {
                let missing = data.get(field).is_none_or(Value::is_null);
                if missing {
                    data.insert(field.to_string(), value.clone());
                }
                Ok(vec![field.to_string()])
            }
            Self::StaticMap { mappings } => map_value(field, data, |value| {
                Ok(scalar_text(value)
                    .and_then(|key| mappings.get(&key).cloned())
                    .unwrap_or_else(|| value.clone()))
            }),
            Self::StringToInt => map_value(field, data, |value| {
                if toward_supabase {
                    match value {
                        Value::Number(_) | Value::Null => Ok(value.clone()),
                        Value::String(text) => text
                            .trim()
                            .parse::<i64>()
                            .map(Value::from)
                            .map_err(|_| format!("not an integer: {text}")),
                        other => Err(format!("not an integer: {other}")),
                    }
                } else {
                    Ok(scalar_text(value).map_or(Value::Null, Value::String))
                }
            }),
        }
    }
}

/// Replace `data[field]` through `transform`; absent fields are left alone.
fn map_value<F>(field: &str, data: &mut Record, transform: F) -> RuleResult
where
    F: FnOnce(&Value) -> Result<Value, String>,
{
    let Some(current) = data.get(field) else {
        return Ok(Vec::new());
    };
    let mapped = transform(current)?;
    data.insert(field.to_string(), mapped);
    Ok(vec![field.to_string()])
}

/// Tri-state boolean coercion: `None` when the value has no boolean reading.
#[must_use]
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => {
            let lowered = text.trim().to_lowercase();
            if TRUE_WORDS.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSE_WORDS.contains(&lowered.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    coerce_bool(value).unwrap_or_else(|| is_present(value))
}

fn parse_prefixed_id(value: &Value, prefix: &str, position: usize) -> Result<Value, String> {
    let text = value
        .as_str()
        .ok_or_else(|| format!("expected a prefixed id, got {value}"))?;
    if !text.starts_with(prefix) {
        return Err(format!("{text} does not start with {prefix}"));
    }
    text.split('-')
        .nth(position)
        .and_then(|part| part.parse::<i64>().ok())
        .map(Value::from)
        .ok_or_else(|| format!("no numeric part at position {position} in {text}"))
}

fn format_prefixed_id(
    value: &Value,
    prefix: &str,
    year: Option<i32>,
    width: usize,
    include_year: bool,
) -> Result<Value, String> {
    let number = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("expected a numeric id, got {value}"))?;

    let formatted = if include_year {
        let year = year.unwrap_or_else(|| chrono::Utc::now().year());
        format!("{prefix}-{year}-{number:0width$}")
    } else {
        format!("{prefix}-{number:0width$}")
    };
    Ok(Value::String(formatted))
}

fn join_names(data: &Record, first_field: &str, last_field: &str) -> Value {
    let first = data.get(first_field).and_then(scalar_text).unwrap_or_default();
    let last = data.get(last_field).and_then(scalar_text).unwrap_or_default();
    let combined = format!("{} {}", first.trim(), last.trim()).trim().to_string();
    if combined.is_empty() {
        Value::Null
    } else {
        Value::String(combined)
    }
}

/// Split on the first space so multi-word last names stay together.
fn split_name(data: &mut Record, full: &str, first_field: &str, last_field: &str) -> Vec<String> {
    let full = full.trim();
    let (first, last) = full.split_once(' ').unwrap_or((full, ""));
    data.insert(first_field.to_string(), Value::String(first.to_string()));
    data.insert(last_field.to_string(), Value::String(last.trim().to_string()));
    vec![first_field.to_string(), last_field.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const F2S: Direction = Direction::FrappeToSupabase;
    const S2F: Direction = Direction::SupabaseToFrappe;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn rule(value: Value) -> ComplexMapping {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn prefix_transform_round_trip() {
        let forward = rule(json!({"type": "prefix_transform", "prefix": "TASK"}));
        let mut data = record(json!({"name": "TASK-2025-0001"}));
        forward.apply_local("name", &mut data, F2S).unwrap();
        assert_eq!(data["name"], json!(1));

        let reverse = rule(json!({"type": "prefix_transform", "prefix": "TASK", "year": 2025}));
        reverse.apply_local("name", &mut data, S2F).unwrap();
        assert_eq!(data["name"], json!("TASK-2025-0001"));
    }

    #[test]
    fn prefix_transform_passes_invalid_input_through() {
        let forward = rule(json!({"type": "prefix_transform", "prefix": "TASK"}));
        let mut data = record(json!({"name": "PROJ-0001"}));
        assert!(forward.apply_local("name", &mut data, F2S).is_err());
        assert_eq!(data["name"], json!("PROJ-0001"));
    }

    #[test]
    fn prefix_without_year() {
        let reverse = rule(json!({
            "type": "prefix_transform", "prefix": "PROJ", "include_year": false, "width": 3
        }));
        let mut data = record(json!({"project": 12}));
        reverse.apply_local("project", &mut data, S2F).unwrap();
        assert_eq!(data["project"], json!("PROJ-012"));
    }

    #[test]
    fn email_priority_selects_first_non_empty() {
        let priority = rule(json!({"type": "email_priority", "email_priority": ["personal", "company"]}));
        let mut data = record(json!({"personal": "", "company": "a@b.com"}));
        let written = priority.apply_local("email", &mut data, F2S).unwrap();
        assert_eq!(written, vec!["email".to_string()]);
        assert_eq!(data["email"], json!("a@b.com"));
    }

    #[test]
    fn email_priority_reverse_distributes() {
        let priority = rule(json!({
            "type": "email_priority", "email_priority": ["personal_email", "company_email"]
        }));
        let mut data = record(json!({"email": "a@b.com"}));
        priority.apply_local("email", &mut data, S2F).unwrap();
        assert_eq!(data["personal_email"], json!("a@b.com"));
        assert_eq!(data["company_email"], json!("a@b.com"));
    }

    #[test]
    fn name_combination_joins_and_splits_on_first_space() {
        let names = rule(json!({"type": "name_combination"}));
        let mut data = record(json!({"first_name": "Ada", "last_name": "King Lovelace"}));
        names.apply_local("name", &mut data, F2S).unwrap();
        assert_eq!(data["name"], json!("Ada King Lovelace"));

        let mut data = record(json!({"name": "Ada King Lovelace"}));
        let written = names.apply_local("name", &mut data, S2F).unwrap();
        assert_eq!(written, vec!["first_name".to_string(), "last_name".to_string()]);
        assert_eq!(data["first_name"], json!("Ada"));
        assert_eq!(data["last_name"], json!("King Lovelace"));
        assert!(!data.contains_key("name"));
    }

    #[test]
    fn reverse_name_combination_reads_source_field() {
        let names = rule(json!({"type": "reverse_name_combination", "source_field": "full_name"}));
        let mut data = record(json!({"full_name": "Grace"}));
        names.apply_local("first_name", &mut data, S2F).unwrap();
        assert_eq!(data["first_name"], json!("Grace"));
        assert_eq!(data["last_name"], json!(""));
    }

    #[test]
    fn status_mapping_both_ways() {
        let status = rule(json!({"type": "status_mapping"}));
        let mut data = record(json!({"status": "Inactive"}));
        status.apply_local("status", &mut data, F2S).unwrap();
        assert_eq!(data["status"], json!(false));

        let mut data = record(json!({"status": "yes"}));
        status.apply_local("status", &mut data, F2S).unwrap();
        assert_eq!(data["status"], json!(true));

        let mut data = record(json!({"status": true}));
        status.apply_local("status", &mut data, S2F).unwrap();
        assert_eq!(data["status"], json!("Active"));
    }

    #[test]
    fn boolean_aliases_share_behaviour() {
        let milestone = rule(json!({"type": "is_milestone_to_needs_submission"}));
        assert_eq!(milestone, ComplexMapping::Boolean);

        let mut data = record(json!({"is_milestone": null}));
        milestone.apply_local("is_milestone", &mut data, F2S).unwrap();
        assert_eq!(data["is_milestone"], json!(false));

        let mut data = record(json!({"needs_submission": true}));
        milestone.apply_local("needs_submission", &mut data, S2F).unwrap();
        assert_eq!(data["needs_submission"], json!(1));
    }

    #[test]
    fn date_rules() {
        let fallback = rule(json!({
            "type": "date_fallback", "primary_field": "exp_end_date", "fallback_field": "exp_start_date"
        }));
        let mut data = record(json!({"exp_end_date": null, "exp_start_date": "2025-01-02"}));
        fallback.apply_local("due_date", &mut data, F2S).unwrap();
        assert_eq!(data["due_date"], json!("2025-01-02"));

        let mut data = record(json!({}));
        fallback.apply_local("due_date", &mut data, F2S).unwrap();
        assert_eq!(data["due_date"], Value::Null);

        let convert = rule(json!({"type": "date_format_conversion"}));
        let mut data = record(json!({"due_date": "2025-03-04T10:00:00Z"}));
        convert.apply_local("due_date", &mut data, S2F).unwrap();
        assert_eq!(data["due_date"], json!("2025-03-04"));
    }

    #[test]
    fn default_value_only_fills_gaps() {
        let default = rule(json!({"type": "default_value", "value": "Open"}));
        let mut data = record(json!({}));
        default.apply_local("status", &mut data, S2F).unwrap();
        assert_eq!(data["status"], json!("Open"));

        let mut data = record(json!({"status": "Closed"}));
        default.apply_local("status", &mut data, S2F).unwrap();
        assert_eq!(data["status"], json!("Closed"));
    }

    #[test]
    fn static_map_and_string_to_int() {
        let orgs = rule(json!({"type": "company_to_org_mapping", "mappings": {"Acme": "org-1"}}));
        let mut data = record(json!({"company": "Acme"}));
        orgs.apply_local("company", &mut data, F2S).unwrap();
        assert_eq!(data["company"], json!("org-1"));

        let ints = rule(json!({"type": "string_to_int"}));
        let mut data = record(json!({"progress": " 42 "}));
        ints.apply_local("progress", &mut data, F2S).unwrap();
        assert_eq!(data["progress"], json!(42));
    }

    #[test]
    fn boolean_vocabulary() {
        assert_eq!(coerce_bool(&json!("On")), Some(true));
        assert_eq!(coerce_bool(&json!("inactive")), Some(false));
        assert_eq!(coerce_bool(&json!(0)), Some(false));
        assert_eq!(coerce_bool(&json!("maybe")), None);
        assert_eq!(coerce_bool(&Value::Null), None);
    }
}
