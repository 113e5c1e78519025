//! Webhook signature checks and payload normalization.

use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tandem_core::models::EventId;
use tandem_core::util::scalar_text;
use tandem_core::{ChangeEvent, Operation, Record, System};

use crate::error::AppError;

pub const FRAPPE_SIGNATURE_HEADER: &str = "x-frappe-signature";
pub const SUPABASE_SIGNATURE_HEADERS: [&str; 2] = ["x-supabase-signature", "x-webhook-secret"];

/// Check a hex HMAC-SHA256 of `body` taken from the first of `headers`
/// that is present.
pub fn verify_signature(
    headers: &HeaderMap,
    names: &[&str],
    secret: &str,
    body: &[u8],
) -> Result<(), AppError> {
    let signature = names
        .iter()
        .find_map(|name| headers.get(*name))
        .ok_or_else(|| AppError::unauthorized("Missing webhook signature"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Webhook signature is not valid UTF-8"))?;
    let expected = hex::decode(signature.trim())
        .map_err(|_| AppError::unauthorized("Webhook signature is not hex"))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Webhook secret rejected by HMAC".to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::unauthorized("Invalid webhook signature"))
}

/// Hex HMAC-SHA256 of `body`, as the senders compute it
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn frappe_operation(verb: &str) -> Operation {
    match verb {
        "after_insert" => Operation::Create,
        "after_delete" | "on_trash" => Operation::Delete,
        _ => Operation::Update,
    }
}

fn supabase_operation(verb: &str) -> Operation {
    match verb.to_ascii_uppercase().as_str() {
        "INSERT" => Operation::Create,
        "DELETE" => Operation::Delete,
        _ => Operation::Update,
    }
}

/// Doctype named in the document, or inferred from its name prefix.
fn frappe_doctype(document: &Record) -> Option<String> {
    if let Some(doctype) = document.get("doctype").and_then(scalar_text) {
        return Some(doctype);
    }
    let name = document.get("name").and_then(Value::as_str)?;
    [("TASK-", "Task"), ("HR-EMP-", "Employee"), ("PROJ-", "Project")]
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, doctype)| (*doctype).to_string())
}

/// Build a change event from a flat Frappe document.
pub fn frappe_event(body: &[u8]) -> Result<ChangeEvent, AppError> {
    let document: Record = serde_json::from_slice(body)
        .map_err(|error| AppError::bad_request(format!("Malformed Frappe payload: {error}")))?;

    let doctype = frappe_doctype(&document)
        .ok_or_else(|| AppError::bad_request("Cannot determine doctype of Frappe document"))?;
    let name = document
        .get("name")
        .or_else(|| document.get("employee"))
        .and_then(scalar_text)
        .unwrap_or_else(|| "unknown".to_string());
    let verb = document
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or("after_update")
        .to_string();

    let event_id = EventId::new(format!("frappe_{doctype}_{name}_{verb}"));
    Ok(
        ChangeEvent::new(System::Frappe, doctype, name, frappe_operation(&verb), document)
            .with_id(event_id)
            .with_original_source(System::Frappe),
    )
}

#[derive(Debug, Deserialize)]
pub struct SupabasePayload {
    #[serde(alias = "operation")]
    #[serde(rename = "type")]
    pub verb: String,
    pub table: String,
    #[serde(default)]
    pub record: Option<Record>,
    #[serde(default)]
    pub old_record: Option<Record>,
}

impl SupabasePayload {
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(body)
            .map_err(|error| AppError::bad_request(format!("Malformed Supabase payload: {error}")))
    }

    pub fn operation(&self) -> Operation {
        supabase_operation(&self.verb)
    }

    /// Build the event once the table's mapping has supplied the record type.
    pub fn into_event(self, record_type: &str) -> Result<ChangeEvent, AppError> {
        let operation = self.operation();
        let data = match operation {
            Operation::Delete => self.old_record.or(self.record),
            Operation::Create | Operation::Update => self.record,
        }
        .ok_or_else(|| AppError::bad_request("Supabase payload carries no record"))?;

        let id = data
            .get("id")
            .and_then(scalar_text)
            .unwrap_or_else(|| "unknown".to_string());
        let event_id = EventId::new(format!("supabase_{}_{id}_{}", self.table, self.verb));
        Ok(
            ChangeEvent::new(System::Supabase, record_type, id, operation, data)
                .with_id(event_id)
                .with_original_source(System::Supabase),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"name":"HR-EMP-0001"}"#;
        let good = headers(FRAPPE_SIGNATURE_HEADER, &sign("token", body));
        assert!(verify_signature(&good, &[FRAPPE_SIGNATURE_HEADER], "token", body).is_ok());

        let wrong_secret = headers(FRAPPE_SIGNATURE_HEADER, &sign("other", body));
        assert!(verify_signature(&wrong_secret, &[FRAPPE_SIGNATURE_HEADER], "token", body).is_err());

        let not_hex = headers(FRAPPE_SIGNATURE_HEADER, "HAPPY");
        assert!(verify_signature(&not_hex, &[FRAPPE_SIGNATURE_HEADER], "token", body).is_err());

        assert!(matches!(
            verify_signature(&HeaderMap::new(), &[FRAPPE_SIGNATURE_HEADER], "token", body),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn supabase_accepts_either_header() {
        let body = br#"{"type":"INSERT"}"#;
        let fallback = headers("x-webhook-secret", &sign("secret", body));
        assert!(verify_signature(&fallback, &SUPABASE_SIGNATURE_HEADERS, "secret", body).is_ok());
    }

    #[test]
    fn frappe_event_infers_doctype_from_name() {
        let body = json!({"name": "TASK-2025-0001", "subject": "Call", "operation": "after_insert"});
        let event = frappe_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.record_type, "Task");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.id.as_str(), "frappe_Task_TASK-2025-0001_after_insert");
        assert_eq!(event.original_source, Some(System::Frappe));
        assert_eq!(event.data["subject"], json!("Call"));
    }

    #[test]
    fn frappe_event_prefers_explicit_doctype() {
        let body = json!({"doctype": "Lead", "name": "CRM-LEAD-1", "operation": "after_delete"});
        let event = frappe_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.record_type, "Lead");
        assert_eq!(event.operation, Operation::Delete);
    }

    #[test]
    fn frappe_event_rejects_unknown_documents() {
        let body = json!({"name": "XYZ-1"});
        assert!(matches!(
            frappe_event(body.to_string().as_bytes()),
            Err(AppError::BadRequest(_))
        ));
        assert!(frappe_event(b"not json").is_err());
    }

    #[test]
    fn frappe_verbs_default_to_update() {
        assert_eq!(frappe_operation("after_insert"), Operation::Create);
        assert_eq!(frappe_operation("after_update"), Operation::Update);
        assert_eq!(frappe_operation("on_submit"), Operation::Update);
    }

    #[test]
    fn supabase_delete_uses_old_record() {
        let body = json!({
            "type": "DELETE",
            "table": "users",
            "record": null,
            "old_record": {"id": 7, "phone_number": "9998887777"}
        });
        let payload = SupabasePayload::parse(body.to_string().as_bytes()).unwrap();
        let event = payload.into_event("Employee").unwrap();
        assert_eq!(event.operation, Operation::Delete);
        assert_eq!(event.record_id, "7");
        assert_eq!(event.id.as_str(), "supabase_users_7_DELETE");
        assert_eq!(event.record_type, "Employee");
    }

    #[test]
    fn supabase_operation_alias() {
        let body = json!({"operation": "UPDATE", "table": "users", "record": {"id": 1}});
        let payload = SupabasePayload::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(payload.operation(), Operation::Update);

        let empty = json!({"type": "INSERT", "table": "users"});
        let payload = SupabasePayload::parse(empty.to_string().as_bytes()).unwrap();
        assert!(payload.into_event("Employee").is_err());
    }
}
