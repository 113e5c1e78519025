//! Service configuration from environment variables.
//!
//! Both binaries read the same core settings; the API layers its own
//! variables on top using the lookup helpers exported here.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::client::{ClientResult, FrappeClient, SupabaseClient};
use crate::db::Database;
use crate::dedup::{DedupSettings, WebhookDeduplicator};
use crate::engine::{EngineSettings, SyncEngine};
use crate::queue::RetryQueue;
use crate::retry::RetryPolicy;
use crate::store::LibSqlMappingStore;
use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry, timeout and dedup tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub operation_timeout: Duration,
    pub request_timeout: Duration,
    pub dedup_enabled: bool,
    pub dedup_window: Duration,
}

impl SyncSettings {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            ..RetryPolicy::default()
        }
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            retry: self.retry_policy(),
            operation_timeout: self.operation_timeout,
        }
    }

    #[must_use]
    pub fn dedup_settings(&self) -> DedupSettings {
        if self.dedup_enabled {
            DedupSettings::with_window(self.dedup_window)
        } else {
            DedupSettings::disabled()
        }
    }
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub frappe_url: String,
    pub frappe_api_key: String,
    pub frappe_api_secret: String,
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    /// libSQL file holding the queue and the mapping store
    pub db_path: PathBuf,
    /// Mapping documents imported at start-up
    pub mappings_file: Option<PathBuf>,
    pub sync: SyncSettings,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceConfig")
            .field("frappe_url", &self.frappe_url)
            .field("frappe_api_key", &self.frappe_api_key)
            .field("frappe_api_secret", &"[REDACTED]")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_service_role_key", &"[REDACTED]")
            .field("db_path", &self.db_path)
            .field("mappings_file", &self.mappings_file)
            .field("sync", &self.sync)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let frappe_url = required_url(&lookup, "FRAPPE_URL")?;
        let frappe_api_key = required_trimmed(&lookup, "FRAPPE_API_KEY")?;
        let frappe_api_secret = required_trimmed(&lookup, "FRAPPE_API_SECRET")?;
        let supabase_url = required_url(&lookup, "SUPABASE_URL")?;
        let supabase_service_role_key = required_trimmed(&lookup, "SUPABASE_SERVICE_ROLE_KEY")?;

        let db_path = PathBuf::from(value_or_default(&lookup, "TANDEM_DB_PATH", "tandem.db"));
        let mappings_file = optional_trimmed(&lookup, "TANDEM_MAPPINGS_FILE").map(PathBuf::from);

        let retry_attempts = parse_bounded(&lookup, "SYNC_RETRY_ATTEMPTS", 3_u32, 0..=10)?;
        let retry_base_delay_ms =
            parse_bounded(&lookup, "SYNC_RETRY_BASE_DELAY_MS", 1_000_u64, 1..=600_000)?;
        let retry_max_delay_ms =
            parse_bounded(&lookup, "SYNC_RETRY_MAX_DELAY_MS", 60_000_u64, 1..=3_600_000)?;
        if retry_max_delay_ms < retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "SYNC_RETRY_MAX_DELAY_MS must be >= SYNC_RETRY_BASE_DELAY_MS".to_string(),
            ));
        }
        let operation_timeout_secs =
            parse_bounded(&lookup, "SYNC_OPERATION_TIMEOUT_SECS", 30_u64, 1..=600)?;
        let request_timeout_secs =
            parse_bounded(&lookup, "SYNC_REQUEST_TIMEOUT_SECS", 30_u64, 1..=300)?;
        let dedup_enabled = parse_flag(&lookup, "WEBHOOK_DEDUP_ENABLED", true)?;
        let dedup_window_ms =
            parse_bounded(&lookup, "WEBHOOK_DEDUP_TIMEOUT_MS", 5_000_u64, 100..=600_000)?;

        Ok(Self {
            frappe_url,
            frappe_api_key,
            frappe_api_secret,
            supabase_url,
            supabase_service_role_key,
            db_path,
            mappings_file,
            sync: SyncSettings {
                retry_attempts,
                retry_base_delay: Duration::from_millis(retry_base_delay_ms),
                retry_max_delay: Duration::from_millis(retry_max_delay_ms),
                operation_timeout: Duration::from_secs(operation_timeout_secs),
                request_timeout: Duration::from_secs(request_timeout_secs),
                dedup_enabled,
                dedup_window: Duration::from_millis(dedup_window_ms),
            },
        })
    }

    pub fn frappe_client(&self) -> ClientResult<FrappeClient> {
        Ok(FrappeClient::new(
            &self.frappe_url,
            &self.frappe_api_key,
            &self.frappe_api_secret,
            self.sync.request_timeout,
        )?
        .with_retry_policy(self.sync.retry_policy()))
    }

    pub fn supabase_client(&self) -> ClientResult<SupabaseClient> {
        Ok(SupabaseClient::new(
            &self.supabase_url,
            &self.supabase_service_role_key,
            self.sync.request_timeout,
        )?
        .with_retry_policy(self.sync.retry_policy()))
    }

    /// Open the database, import the mappings file if one is configured and
    /// wire an engine against the live systems.
    pub async fn open_engine(&self) -> crate::Result<SyncEngine> {
        let db = Arc::new(Mutex::new(Database::open(&self.db_path).await?));
        let mappings = LibSqlMappingStore::new(db.clone());
        if let Some(path) = &self.mappings_file {
            mappings.import_file(path).await?;
        }

        let frappe = self.frappe_client()?;
        let supabase = self.supabase_client()?;
        tracing::info!(db_path = %self.db_path.display(), "Sync engine ready");
        Ok(SyncEngine::new(
            Arc::new(frappe),
            Arc::new(supabase),
            Arc::new(mappings),
            Arc::new(WebhookDeduplicator::new(self.sync.dedup_settings())),
            RetryQueue::new(db),
            self.sync.engine_settings(),
        ))
    }
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn required_url(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    let value = required_trimmed(lookup, name)?;
    if !is_http_url(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must start with http:// or https://"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Parse `name` as a number in `range`, falling back to `default` when unset.
pub fn parse_bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<T>().map_err(|_| invalid())?,
        None => default,
    };
    if !range.contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}

pub fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name} must be true or false"))),
    }
}
