//! Supabase PostgREST client (`/rest/v1`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use super::{
    expect_record, normalize_base_url, send_with_retry, ClientError, ClientResult,
    FieldDescriptor, RecordStore,
};
use crate::models::{Record, System};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct SupabaseClient {
    rest_url: String,
    service_role_key: String,
    client: Client,
    retry: RetryPolicy,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SupabaseClient")
            .field("rest_url", &self.rest_url)
            .field("service_role_key", &"[REDACTED]")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(
        url: &str,
        service_role_key: impl Into<String>,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let rest_url = normalize_rest_url(url)?;
        let service_role_key = service_role_key.into().trim().to_string();
        if service_role_key.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "Supabase service role key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url,
            service_role_key,
            client: Client::builder().timeout(request_timeout).build()?,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, urlencoding::encode(table))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Accept", "application/json")
    }

    /// Rows returned by a PostgREST call; `None` when the table is unknown.
    async fn send_rows<F>(&self, build: F) -> ClientResult<Option<Vec<Record>>>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = send_with_retry(&self.retry, System::Supabase, || {
            self.authorized(build())
        })
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        match serde_json::from_str::<Value>(&text)
            .map_err(|error| ClientError::InvalidPayload(error.to_string()))?
        {
            Value::Array(rows) => rows
                .into_iter()
                .map(|row| expect_record(row, "Supabase row"))
                .collect::<ClientResult<Vec<_>>>()
                .map(Some),
            Value::Object(row) => Ok(Some(vec![row])),
            other => Err(ClientError::InvalidPayload(format!(
                "unexpected PostgREST response: {}",
                crate::util::compact_text(&other.to_string())
            ))),
        }
    }

    fn single_row(rows: Option<Vec<Record>>, context: &str) -> ClientResult<Record> {
        rows.and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| ClientError::InvalidPayload(format!("{context} returned no row")))
    }
}

/// `https://x.supabase.co` -> `https://x.supabase.co/rest/v1`
fn normalize_rest_url(url: &str) -> ClientResult<String> {
    let base = normalize_base_url(url, "Supabase")?;
    if base.ends_with("/rest/v1") {
        Ok(base)
    } else {
        Ok(format!("{base}/rest/v1"))
    }
}

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

fn parse_openapi_fields(spec: &Value, table: &str) -> Vec<FieldDescriptor> {
    let Some(definition) = spec.get("definitions").and_then(|defs| defs.get(table)) else {
        return Vec::new();
    };
    let required: Vec<&str> = definition
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = definition.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, property)| FieldDescriptor {
            name: name.clone(),
            data_type: property
                .get("format")
                .or_else(|| property.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            required: required.contains(&name.as_str()),
        })
        .collect()
}

#[async_trait]
impl RecordStore for SupabaseClient {
    fn system(&self) -> System {
        System::Supabase
    }

    async fn get_record(&self, table: &str, id: &str) -> ClientResult<Option<Record>> {
        self.find_by_field(table, "id", id).await
    }

    async fn find_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> ClientResult<Option<Record>> {
        let url = self.table_url(table);
        let filter = eq_filter(value);
        let rows = self
            .send_rows(|| {
                self.client
                    .get(&url)
                    .query(&[(field, filter.as_str()), ("select", "*"), ("limit", "1")])
            })
            .await?;
        Ok(rows.and_then(|rows| rows.into_iter().next()))
    }

    async fn create(&self, table: &str, data: &Record) -> ClientResult<Record> {
        let url = self.table_url(table);
        let rows = self
            .send_rows(|| {
                self.client
                    .post(&url)
                    .header("Prefer", "return=representation")
                    .json(data)
            })
            .await?;
        Self::single_row(rows, "Supabase insert")
    }

    async fn update(&self, table: &str, id: &str, data: &Record) -> ClientResult<Record> {
        let url = self.table_url(table);
        let filter = eq_filter(id);
        let rows = self
            .send_rows(|| {
                self.client
                    .patch(&url)
                    .query(&[("id", filter.as_str())])
                    .header("Prefer", "return=representation")
                    .json(data)
            })
            .await?;
        Self::single_row(rows, "Supabase update")
    }

    async fn delete(&self, table: &str, id: &str) -> ClientResult<bool> {
        let url = self.table_url(table);
        let filter = eq_filter(id);
        let rows = self
            .send_rows(|| {
                self.client
                    .delete(&url)
                    .query(&[("id", filter.as_str())])
                    .header("Prefer", "return=representation")
            })
            .await?;
        Ok(rows.is_some_and(|rows| !rows.is_empty()))
    }

    async fn get_schema(&self, table: &str) -> ClientResult<Vec<FieldDescriptor>> {
        let url = format!("{}/", self.rest_url);
        let response = send_with_retry(&self.retry, System::Supabase, || {
            self.authorized(self.client.get(&url))
                .header("Accept", "application/openapi+json")
        })
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let spec = response.json::<Value>().await?;
        Ok(parse_openapi_fields(&spec, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rest_url_is_appended_once() {
        assert_eq!(
            normalize_rest_url("https://demo.supabase.co").unwrap(),
            "https://demo.supabase.co/rest/v1"
        );
        assert_eq!(
            normalize_rest_url("https://demo.supabase.co/rest/v1/").unwrap(),
            "https://demo.supabase.co/rest/v1"
        );
    }

    #[test]
    fn debug_redacts_service_key() {
        let client =
            SupabaseClient::new("https://demo.supabase.co", "service-secret", Duration::from_secs(5))
                .unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("service-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn table_names_are_encoded() {
        let client =
            SupabaseClient::new("https://demo.supabase.co", "k", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.table_url("my table"),
            "https://demo.supabase.co/rest/v1/my%20table"
        );
    }

    #[test]
    fn openapi_definitions_become_field_descriptors() {
        let spec = json!({"definitions": {"users": {
            "required": ["id"],
            "properties": {
                "id": {"type": "string", "format": "uuid"},
                "email": {"type": "string", "format": "text"},
                "active": {"type": "boolean"}
            }
        }}});
        let fields = parse_openapi_fields(&spec, "users");
        assert_eq!(fields.len(), 3);
        let id = fields.iter().find(|field| field.name == "id").unwrap();
        assert!(id.required);
        assert_eq!(id.data_type, "uuid");
        assert!(parse_openapi_fields(&spec, "missing").is_empty());
    }
}
