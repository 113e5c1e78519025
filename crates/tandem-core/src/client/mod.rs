//! REST adapters for the two systems.
//!
//! The engine only ever talks to a [`RecordStore`]; the concrete clients are
//! thin shims over each system's HTTP API and can be swapped for the
//! in-memory store in tests.

mod frappe;
pub mod memory;
mod supabase;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Record, System};
use crate::retry::RetryPolicy;
use crate::util::compact_text;

pub use frappe::FrappeClient;
pub use memory::InMemoryRecordStore;
pub use supabase::SupabaseClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),
}

impl ClientError {
    /// Transport failures, throttling and server errors; worth another try.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidPayload(_) | Self::InvalidConfiguration(_) => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// One column or document field as reported by a system's schema endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: String,
    pub required: bool,
}

/// Record-level access to one system.
///
/// `collection` is a Frappe doctype or a Supabase table. Ids are the
/// system's native ids (`name` or `id`).
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn system(&self) -> System;

    async fn get_record(&self, collection: &str, id: &str) -> ClientResult<Option<Record>>;

    /// First record whose `field` equals `value`
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> ClientResult<Option<Record>>;

    async fn create(&self, collection: &str, data: &Record) -> ClientResult<Record>;

    async fn update(&self, collection: &str, id: &str, data: &Record) -> ClientResult<Record>;

    /// `false` when there was nothing to delete
    async fn delete(&self, collection: &str, id: &str) -> ClientResult<bool>;

    async fn get_schema(&self, collection: &str) -> ClientResult<Vec<FieldDescriptor>>;
}

/// Trim and validate a base URL, dropping any trailing slash.
pub(crate) fn normalize_base_url(url: &str, label: &str) -> ClientResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::InvalidConfiguration(format!(
            "{label} URL must not be empty"
        )));
    }
    if !crate::util::is_http_url(trimmed) {
        return Err(ClientError::InvalidConfiguration(format!(
            "{label} URL must include http:// or https://"
        )));
    }
    Ok(trimmed.to_string())
}

/// Send a request, retrying transient failures per `policy`.
///
/// Success and 404 responses are handed back for the caller to interpret;
/// any other status becomes [`ClientError::Api`].
pub(crate) async fn send_with_retry<F>(
    policy: &RetryPolicy,
    system: System,
    build: F,
) -> ClientResult<Response>
where
    F: Fn() -> RequestBuilder + Send + Sync,
{
    let mut attempt = 0;
    loop {
        let error = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                ClientError::Api {
                    status: status.as_u16(),
                    message: parse_api_error(status, &body),
                }
            }
            Err(error) => ClientError::Http(error),
        };

        if !error.is_transient() || attempt >= policy.max_retries {
            return Err(error);
        }
        let backoff = policy.delay_for(attempt);
        tracing::warn!(
            %system,
            attempt = attempt + 1,
            wait_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Transient request failure, retrying with backoff"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: Option<String>,
    exception: Option<String>,
    exc_type: Option<String>,
    error: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// Best-effort error text from a Frappe or PostgREST error body.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.exception)
            .or(payload.exc_type)
            .or(payload.error)
            .or(payload.details)
            .or(payload.hint)
        {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

/// Interpret a JSON value as a record, or fail with the given context.
pub(crate) fn expect_record(value: serde_json::Value, context: &str) -> ClientResult<Record> {
    match value {
        serde_json::Value::Object(record) => Ok(record),
        other => Err(ClientError::InvalidPayload(format!(
            "{context}: expected an object, got {}",
            compact_text(&other.to_string())
        ))),
    }
}
