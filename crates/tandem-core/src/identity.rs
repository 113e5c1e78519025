//! Business identity of a record.
//!
//! Native ids are never shared between the two systems, so "the same record"
//! is recognised by a business key instead: a normalized phone number, an
//! email address, or for tasks a subject plus the start of the description.
//! The candidate field names depend on which system's vocabulary the data is
//! written in, and live in the tables below rather than at call sites.

use std::fmt;

use serde_json::Value;

use crate::models::{Record, System};
use crate::util::scalar_text;

/// Fields whose presence marks a record as a task.
const TASK_MARKER_FIELDS: &[&str] = &[
    "subject",
    "task_name",
    "description",
    "page_content",
    "progress",
    "is_milestone",
];
const TASK_SUBJECT_FIELDS: &[&str] = &["subject", "task_name", "name"];
const TASK_DESCRIPTION_FIELDS: &[&str] = &["description", "page_content"];
const SNIPPET_CHARS: usize = 50;
const PHONE_DIGITS: usize = 10;

const PHONE_FROM_FRAPPE: &[&str] = &["cell_number", "mobile_no", "phone", "contact_number"];
const PHONE_FROM_SUPABASE: &[&str] = &["phone_number", "mobile", "phone", "contact_number"];
const PHONE_ANY: &[&str] = &[
    "phone_number",
    "cell_number",
    "mobile_no",
    "phone",
    "contact_number",
];

const EMAIL_FROM_FRAPPE: &[&str] = &[
    "personal_email",
    "company_email",
    "preferred_contact_email",
    "email",
];
const EMAIL_FROM_SUPABASE: &[&str] = &["email", "personal_email", "company_email"];
const EMAIL_ANY: &[&str] = &[
    "email",
    "personal_email",
    "company_email",
    "preferred_contact_email",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Phone,
    Email,
    TaskSubject,
}

impl IdentityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
            Self::TaskSubject => "task_subject",
        }
    }
}

/// A business key extracted from a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Last ten digits of a phone number
    Phone(String),
    Email(String),
    Task {
        subject: String,
        /// First 50 characters of the description, flattened to one line
        snippet: Option<String>,
    },
}

impl Identity {
    #[must_use]
    pub const fn kind(&self) -> IdentityKind {
        match self {
            Self::Phone(_) => IdentityKind::Phone,
            Self::Email(_) => IdentityKind::Email,
            Self::Task { .. } => IdentityKind::TaskSubject,
        }
    }

    /// Normalized value without the kind prefix.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::Phone(value) | Self::Email(value) => value.clone(),
            Self::Task {
                subject,
                snippet: Some(snippet),
            } => format!("{subject}|{snippet}"),
            Self::Task {
                subject,
                snippet: None,
            } => subject.clone(),
        }
    }

    /// Field/value pair to search for in `system`, in that system's vocabulary.
    #[must_use]
    pub fn business_key(&self, system: System) -> BusinessKey {
        match (self, system) {
            (Self::Phone(value), System::Supabase) => BusinessKey::exact("phone_number", value),
            (Self::Phone(value), System::Frappe) => BusinessKey::exact("cell_number", value),
            (Self::Email(value), System::Supabase) => BusinessKey::exact("email", value),
            (Self::Email(value), System::Frappe) => BusinessKey::exact("personal_email", value),
            (Self::Task { subject, snippet }, System::Supabase) => BusinessKey {
                field: "task_name",
                value: subject.clone(),
                snippet: snippet.clone().map(|s| ("page_content", s)),
            },
            (Self::Task { subject, snippet }, System::Frappe) => BusinessKey {
                field: "subject",
                value: subject.clone(),
                snippet: snippet.clone().map(|s| ("description", s)),
            },
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.value())
    }
}

/// Where to look for a record by business key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessKey {
    pub field: &'static str,
    pub value: String,
    /// Description field and expected snippet for task keys
    pub snippet: Option<(&'static str, String)>,
}

impl BusinessKey {
    fn exact(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
            snippet: None,
        }
    }

    /// Whether a record found by `field == value` really is the one we want.
    /// Task keys additionally require the candidate's description to contain
    /// the snippet.
    #[must_use]
    pub fn matches(&self, candidate: &Record) -> bool {
        let Some((field, expected)) = &self.snippet else {
            return true;
        };
        candidate
            .get(*field)
            .and_then(scalar_text)
            .is_some_and(|text| text.replace(['\n', '\r'], " ").contains(expected.as_str()))
    }
}

/// Extract the business identity of `data`.
///
/// `data` is expressed in `source`'s field vocabulary. `target` narrows the
/// candidate field lists to one route; `None` (or `target == source`) uses
/// the broad list that covers both vocabularies.
#[must_use]
pub fn identify(
    record_type: &str,
    data: &Record,
    source: System,
    target: Option<System>,
) -> Option<Identity> {
    if is_task(data) {
        if let Some(identity) = task_identity(data) {
            return Some(identity);
        }
        tracing::debug!(record_type, "Task record without subject, trying contact fields");
    }

    let route = target.filter(|target| *target != source).map(|_| source);
    if let Some(phone) = phone_fields(route)
        .iter()
        .find_map(|field| data.get(*field).and_then(normalize_phone_value))
    {
        return Some(Identity::Phone(phone));
    }

    email_fields(route)
        .iter()
        .find_map(|field| data.get(*field).and_then(normalize_email))
        .map(Identity::Email)
}

/// Keep the last ten digits of a phone number; `None` when fewer than ten.
///
/// Labels and international prefixes are dropped along with every other
/// non-digit: `"whatsapp: +91 90030 37804"` becomes `"9003037804"`.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < PHONE_DIGITS {
        return None;
    }
    Some(digits[digits.len() - PHONE_DIGITS..].to_string())
}

/// [`normalize_phone`] over a JSON value; numbers are accepted as well as text.
#[must_use]
pub fn normalize_phone_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => normalize_phone(text),
        Value::Number(number) => number
            .as_u64()
            .map(|n| n.to_string())
            .or_else(|| number.as_i64().map(|n| n.unsigned_abs().to_string()))
            .and_then(|text| normalize_phone(&text)),
        _ => None,
    }
}

fn normalize_email(value: &Value) -> Option<String> {
    let text = value.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_lowercase())
    }
}

fn is_task(data: &Record) -> bool {
    TASK_MARKER_FIELDS.iter().any(|field| data.contains_key(*field))
}

fn task_identity(data: &Record) -> Option<Identity> {
    let subject = first_text(data, TASK_SUBJECT_FIELDS)?;
    let subject = subject.trim().to_string();
    if subject.is_empty() {
        return None;
    }
    let snippet = first_text(data, TASK_DESCRIPTION_FIELDS)
        .map(|text| description_snippet(&text))
        .filter(|snippet| !snippet.is_empty());
    Some(Identity::Task { subject, snippet })
}

fn description_snippet(text: &str) -> String {
    text.chars()
        .take(SNIPPET_CHARS)
        .collect::<String>()
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

fn first_text(data: &Record, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| data.get(*field).and_then(scalar_text))
}

const fn phone_fields(route: Option<System>) -> &'static [&'static str] {
    match route {
        Some(System::Frappe) => PHONE_FROM_FRAPPE,
        Some(System::Supabase) => PHONE_FROM_SUPABASE,
        None => PHONE_ANY,
    }
}

const fn email_fields(route: Option<System>) -> &'static [&'static str] {
    match route {
        Some(System::Frappe) => EMAIL_FROM_FRAPPE,
        Some(System::Supabase) => EMAIL_FROM_SUPABASE,
        None => EMAIL_ANY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn phone_normalization_keeps_last_ten_digits() {
        assert_eq!(normalize_phone("+919003037804").as_deref(), Some("9003037804"));
        assert_eq!(
            normalize_phone("whatsapp: 919003037804").as_deref(),
            Some("9003037804")
        );
        assert_eq!(normalize_phone("+1-555-123-4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(
            normalize_phone_value(&json!(9_998_887_777_u64)).as_deref(),
            Some("9998887777")
        );
    }

    #[test]
    fn phone_takes_priority_over_email() {
        let data = record(json!({
            "personal_email": "a@b.com",
            "cell_number": "(999) 888-7777",
        }));
        let identity = identify("Employee", &data, System::Frappe, Some(System::Supabase));
        assert_eq!(identity, Some(Identity::Phone("9998887777".into())));
        assert_eq!(identity.unwrap().to_string(), "phone:9998887777");
    }

    #[test]
    fn short_phone_falls_back_to_email() {
        let data = record(json!({"phone_number": "123", "email": " Someone@Example.com "}));
        let identity = identify("users", &data, System::Supabase, Some(System::Frappe));
        assert_eq!(identity, Some(Identity::Email("someone@example.com".into())));
    }

    #[test]
    fn route_lists_use_source_vocabulary() {
        // mobile is a Supabase-side field only
        let data = record(json!({"mobile": "9998887777"}));
        assert!(identify("users", &data, System::Frappe, Some(System::Supabase)).is_none());
        assert!(identify("users", &data, System::Supabase, Some(System::Frappe)).is_some());
    }

    #[test]
    fn task_identity_combines_subject_and_snippet() {
        let description = "Line one\nline two of a description that keeps going well past fifty chars";
        let data = record(json!({"subject": "Fix login", "description": description}));
        let identity = identify("Task", &data, System::Frappe, None).unwrap();

        assert_eq!(identity.kind(), IdentityKind::TaskSubject);
        let value = identity.value();
        let (subject, snippet) = value.split_once('|').unwrap();
        assert_eq!(subject, "Fix login");
        assert_eq!(snippet.chars().count(), 50);
        assert!(!snippet.contains('\n'));
    }

    #[test]
    fn task_without_description_uses_subject_only() {
        let data = record(json!({"task_name": "Ship it", "progress": 10}));
        let identity = identify("tasks", &data, System::Supabase, None).unwrap();
        assert_eq!(identity.to_string(), "task_subject:Ship it");
    }

    #[test]
    fn task_without_subject_tries_contact_fields() {
        let data = record(json!({"progress": 10, "email": "x@y.z"}));
        assert_eq!(
            identify("tasks", &data, System::Supabase, None),
            Some(Identity::Email("x@y.z".into()))
        );
    }

    #[test]
    fn no_identity_when_nothing_matches() {
        let data = record(json!({"first_name": "Ada"}));
        assert!(identify("users", &data, System::Supabase, None).is_none());
    }

    #[test]
    fn business_keys_follow_system_vocabulary() {
        let phone = Identity::Phone("9998887777".into());
        assert_eq!(phone.business_key(System::Supabase).field, "phone_number");
        assert_eq!(phone.business_key(System::Frappe).field, "cell_number");

        let task = Identity::Task {
            subject: "Fix login".into(),
            snippet: Some("Steps to reproduce".into()),
        };
        let key = task.business_key(System::Supabase);
        assert_eq!(key.field, "task_name");
        assert!(key.matches(&record(json!({"page_content": "Steps to reproduce"}))));
        assert!(!key.matches(&record(json!({"page_content": "Something else"}))));
    }
}
