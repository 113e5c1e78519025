//! Frappe REST client (`/api/resource`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use super::{
    expect_record, normalize_base_url, send_with_retry, ClientError, ClientResult,
    FieldDescriptor, RecordStore,
};
use crate::models::{Record, System};
use crate::retry::RetryPolicy;

/// Fields that describe layout rather than data in a doctype schema
const LAYOUT_FIELD_TYPES: &[&str] = &[
    "Section Break",
    "Column Break",
    "Tab Break",
    "HTML",
    "Button",
    "Heading",
];

#[derive(Clone)]
pub struct FrappeClient {
    base_url: String,
    api_key: String,
    api_secret: String,
    client: Client,
    retry: RetryPolicy,
}

impl fmt::Debug for FrappeClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FrappeClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FrappeClient {
    pub fn new(
        url: &str,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let base_url = normalize_base_url(url, "Frappe")?;
        let api_key = api_key.into().trim().to_string();
        let api_secret = api_secret.into().trim().to_string();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "Frappe API key and secret must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            api_key,
            api_secret,
            client: Client::builder().timeout(request_timeout).build()?,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn resource_url(&self, doctype: &str) -> String {
        format!(
            "{}/api/resource/{}",
            self.base_url,
            urlencoding::encode(doctype)
        )
    }

    fn document_url(&self, doctype: &str, name: &str) -> String {
        format!(
            "{}/{}",
            self.resource_url(doctype),
            urlencoding::encode(name)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(
                "Authorization",
                format!("token {}:{}", self.api_key, self.api_secret),
            )
            .header("Accept", "application/json")
    }

    async fn send<F>(&self, build: F) -> ClientResult<Option<Value>>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = send_with_retry(&self.retry, System::Frappe, || {
            self.authorized(build())
        })
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.json::<Value>().await?;
        Ok(Some(body))
    }
}

/// Frappe wraps resource payloads as `{"data": ...}`
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_doctype_fields(body: &Value) -> Vec<FieldDescriptor> {
    let docs = body
        .get("docs")
        .or_else(|| body.get("message").and_then(|message| message.get("docs")));
    let Some(fields) = docs
        .and_then(|docs| docs.get(0))
        .and_then(|doc| doc.get("fields"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    fields
        .iter()
        .filter_map(|field| {
            let name = field.get("fieldname")?.as_str()?;
            let data_type = field.get("fieldtype").and_then(Value::as_str).unwrap_or("Data");
            if LAYOUT_FIELD_TYPES.contains(&data_type) {
                return None;
            }
            Some(FieldDescriptor {
                name: name.to_string(),
                data_type: data_type.to_string(),
                required: field.get("reqd").and_then(Value::as_i64).unwrap_or(0) == 1,
            })
        })
        .collect()
}

#[async_trait]
impl RecordStore for FrappeClient {
    fn system(&self) -> System {
        System::Frappe
    }

    async fn get_record(&self, doctype: &str, name: &str) -> ClientResult<Option<Record>> {
        let url = self.document_url(doctype, name);
        match self.send(|| self.client.get(&url)).await? {
            Some(body) => expect_record(unwrap_data(body), "Frappe document").map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_field(
        &self,
        doctype: &str,
        field: &str,
        value: &str,
    ) -> ClientResult<Option<Record>> {
        let url = self.resource_url(doctype);
        let filters = json!([[field, "=", value]]).to_string();
        let Some(body) = self
            .send(|| {
                self.client.get(&url).query(&[
                    ("filters", filters.as_str()),
                    ("fields", r#"["*"]"#),
                    ("limit_page_length", "1"),
                ])
            })
            .await?
        else {
            return Ok(None);
        };

        match unwrap_data(body) {
            Value::Array(rows) => rows
                .into_iter()
                .next()
                .map(|row| expect_record(row, "Frappe list row"))
                .transpose(),
            other => Err(ClientError::InvalidPayload(format!(
                "Frappe list response was not an array: {}",
                crate::util::compact_text(&other.to_string())
            ))),
        }
    }

    async fn create(&self, doctype: &str, data: &Record) -> ClientResult<Record> {
        let url = self.resource_url(doctype);
        let body = self
            .send(|| self.client.post(&url).json(data))
            .await?
            .ok_or_else(|| ClientError::Api {
                status: 404,
                message: format!("Doctype {doctype} not found"),
            })?;
        expect_record(unwrap_data(body), "Frappe create response")
    }

    async fn update(&self, doctype: &str, name: &str, data: &Record) -> ClientResult<Record> {
        let url = self.document_url(doctype, name);
        let body = self
            .send(|| self.client.put(&url).json(data))
            .await?
            .ok_or_else(|| ClientError::Api {
                status: 404,
                message: format!("{doctype} {name} not found"),
            })?;
        expect_record(unwrap_data(body), "Frappe update response")
    }

    async fn delete(&self, doctype: &str, name: &str) -> ClientResult<bool> {
        let url = self.document_url(doctype, name);
        Ok(self.send(|| self.client.delete(&url)).await?.is_some())
    }

    async fn get_schema(&self, doctype: &str) -> ClientResult<Vec<FieldDescriptor>> {
        let url = format!(
            "{}/api/method/frappe.desk.form.load.getdoctype",
            self.base_url
        );
        let body = self
            .send(|| self.client.get(&url).query(&[("doctype", doctype)]))
            .await?
            .unwrap_or(Value::Null);
        Ok(parse_doctype_fields(&body))
    }
}
