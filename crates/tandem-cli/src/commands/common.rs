use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tandem_core::db::Database;
use tandem_core::mapping::MappingConfig;
use tandem_core::models::{QueueStatus, QueuedOperation};
use tandem_core::queue::RetryQueue;
use tandem_core::store::LibSqlMappingStore;
use tandem_core::OperationId;
use tokio::sync::Mutex;

use crate::error::CliError;

pub const DEFAULT_DB_FILE: &str = "tandem.db";
const ERROR_PREVIEW_CHARS: usize = 60;

/// Queue and mapping store sharing one connection
pub struct Stores {
    pub queue: RetryQueue,
    pub mappings: LibSqlMappingStore,
}

pub async fn open_stores(db_path: &Path) -> Result<Stores, CliError> {
    let db = Arc::new(Mutex::new(Database::open(db_path).await?));
    Ok(Stores {
        queue: RetryQueue::new(db.clone()),
        mappings: LibSqlMappingStore::new(db),
    })
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TANDEM_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

pub fn parse_operation_id(raw: &str) -> Result<OperationId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidOperationId(trimmed.to_string()))
}

#[derive(Debug, Serialize)]
pub struct FailedListItem {
    pub id: String,
    pub direction: String,
    pub record_type: String,
    pub record_id: String,
    pub operation: String,
    pub retry_count: u32,
    pub requeue_count: u32,
    pub error: Option<String>,
    pub failed_at: Option<i64>,
    pub failed_at_iso: Option<String>,
}

pub fn failed_to_list_item(queued: &QueuedOperation) -> FailedListItem {
    let operation = &queued.operation;
    FailedListItem {
        id: operation.id.to_string(),
        direction: operation.direction.to_string(),
        record_type: operation.record_type.clone(),
        record_id: operation.record_id.clone(),
        operation: operation.operation.to_string(),
        retry_count: operation.retry_count,
        requeue_count: queued.requeue_count,
        error: operation.error_message.clone(),
        failed_at: queued.failed_at,
        failed_at_iso: queued.failed_at.map(format_timestamp),
    }
}

pub fn format_failed_lines(operations: &[QueuedOperation]) -> Vec<String> {
    if operations.is_empty() {
        return vec!["No failed operations.".to_string()];
    }

    operations
        .iter()
        .map(|queued| {
            let operation = &queued.operation;
            let when = queued
                .failed_at
                .map_or_else(|| "-".to_string(), format_timestamp);
            let error = operation
                .error_message
                .as_deref()
                .map_or_else(|| "-".to_string(), |message| truncate(message, ERROR_PREVIEW_CHARS));
            format!(
                "{}  {}  {} {} {}  retries={} requeues={}  {}  {}",
                operation.id,
                when,
                operation.operation,
                operation.record_type,
                operation.record_id,
                operation.retry_count,
                queued.requeue_count,
                operation.direction,
                error
            )
        })
        .collect()
}

pub fn format_status_lines(status: &QueueStatus) -> Vec<String> {
    vec![
        format!("pending:    {}", status.pending),
        format!("processing: {}", status.processing),
        format!("failed:     {}", status.failed),
        format!("total:      {}", status.total),
    ]
}

pub fn format_mapping_lines(mappings: &[(String, MappingConfig)]) -> Vec<String> {
    if mappings.is_empty() {
        return vec!["No mappings configured.".to_string()];
    }

    mappings
        .iter()
        .map(|(name, config)| {
            let state = if config.enabled { "" } else { "  (disabled)" };
            format!(
                "{name}  {} <-> {}  {}  {}{state}",
                config.frappe_doctype,
                config.supabase_table,
                config.direction.as_str(),
                config.conflict_resolution
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut shortened = collapsed.chars().take(take_len).collect::<String>();
        shortened.push_str("...");
        shortened
    }
}
