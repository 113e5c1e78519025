//! Retry queue repository implementation

use crate::error::{Error, Result};
use crate::models::{OperationId, QueueState, QueueStatus, QueuedOperation, SyncOperation};
use crate::util::unix_timestamp_millis;
use libsql::{params, Connection, Row, Value};

const COLUMNS: &str =
    "id, state, payload, retry_count, error, enqueued_at, failed_at, retry_at, requeue_count";

/// Trait for durable queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Store an operation in `state`, replacing any row with the same id
    async fn insert(
        &self,
        operation: &SyncOperation,
        state: QueueState,
        error: Option<&str>,
    ) -> Result<()>;

    /// Atomically move the oldest pending operation to processing
    async fn claim_next(&self) -> Result<Option<QueuedOperation>>;

    /// Delete an operation; `false` when it was not queued
    async fn remove(&self, id: &OperationId) -> Result<bool>;

    /// Move a claimed operation to the failed list, keeping its queue
    /// position and requeue count and saving its attempt count
    async fn mark_failed(&self, operation: &SyncOperation, error: &str) -> Result<bool>;

    /// Move failed operations requeued fewer than `max_retries` times back
    /// to pending
    async fn requeue_failed(&self, max_retries: u32) -> Result<u64>;

    /// Delete failed operations that failed before `cutoff` (unix ms)
    async fn delete_failed_before(&self, cutoff: i64) -> Result<u64>;

    /// Move every processing operation back to pending
    async fn requeue_processing(&self) -> Result<u64>;

    async fn counts(&self) -> Result<QueueStatus>;

    async fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>>;

    /// Failed operations, most recent failure first
    async fn list_failed(&self, limit: usize) -> Result<Vec<QueuedOperation>>;

    /// Delete every queued operation
    async fn clear(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &Row) -> Result<QueuedOperation> {
        let id: String = row.get(0)?;
        let state: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let retry_count: i64 = row.get(3)?;
        let requeue_count: i64 = row.get(8)?;

        let mut operation: SyncOperation = serde_json::from_str(&payload)?;
        operation.retry_count = u32::try_from(retry_count)
            .map_err(|_| Error::Database(format!("Invalid retry count for operation {id}")))?;
        operation.error_message = optional_text(row.get_value(4)?);

        Ok(QueuedOperation {
            operation,
            state: state.parse()?,
            requeue_count: u32::try_from(requeue_count)
                .map_err(|_| Error::Database(format!("Invalid requeue count for operation {id}")))?,
            enqueued_at: row.get(5)?,
            failed_at: optional_integer(row.get_value(6)?),
            retry_at: optional_integer(row.get_value(7)?),
        })
    }

    async fn query_operations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<QueuedOperation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_row(&row)?);
        }
        Ok(operations)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert(
        &self,
        operation: &SyncOperation,
        state: QueueState,
        error: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp_millis();
        let payload = serde_json::to_string(operation)?;
        let failed_at = (state == QueueState::Failed).then_some(now);

        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_operations
                    (id, seq, state, record_type, direction, payload, retry_count, error,
                     enqueued_at, updated_at, failed_at, retry_at)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_operations), ?2, ?3, ?4, ?5,
                         ?6, ?7, ?8, ?8, ?9, NULL)",
                params![
                    operation.id.as_str(),
                    state.as_str(),
                    operation.record_type.as_str(),
                    operation.direction.as_str(),
                    payload,
                    i64::from(operation.retry_count),
                    error.map(str::to_string),
                    now,
                    failed_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<QueuedOperation>> {
        let sql = format!(
            "UPDATE sync_operations SET state = 'processing', updated_at = ?1
             WHERE id = (
                 SELECT id FROM sync_operations
                 WHERE state = 'pending'
                 ORDER BY seq ASC, enqueued_at ASC
                 LIMIT 1
             )
             RETURNING {COLUMNS}"
        );
        let mut claimed = self
            .query_operations(&sql, params![unix_timestamp_millis()])
            .await?;
        Ok(claimed.pop())
    }

    async fn remove(&self, id: &OperationId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sync_operations WHERE id = ?1", [id.as_str()])
            .await?;
        Ok(affected > 0)
    }

    async fn mark_failed(&self, operation: &SyncOperation, error: &str) -> Result<bool> {
        let now = unix_timestamp_millis();
        let payload = serde_json::to_string(operation)?;
        let affected = self
            .conn
            .execute(
                "UPDATE sync_operations
                 SET state = 'failed', error = ?1, failed_at = ?2, updated_at = ?2,
                     retry_count = ?3, payload = ?4
                 WHERE id = ?5",
                params![
                    error,
                    now,
                    i64::from(operation.retry_count),
                    payload,
                    operation.id.as_str()
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn requeue_failed(&self, max_retries: u32) -> Result<u64> {
        let now = unix_timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE sync_operations
                 SET state = 'pending',
                     retry_count = retry_count + 1,
                     requeue_count = requeue_count + 1,
                     retry_at = ?1,
                     updated_at = ?1,
                     seq = (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_operations)
                 WHERE state = 'failed' AND requeue_count < ?2",
                params![now, i64::from(max_retries)],
            )
            .await?;
        Ok(affected)
    }

    async fn delete_failed_before(&self, cutoff: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM sync_operations WHERE state = 'failed' AND failed_at < ?1",
                params![cutoff],
            )
            .await?;
        Ok(affected)
    }

    async fn requeue_processing(&self) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "UPDATE sync_operations SET state = 'pending', updated_at = ?1
                 WHERE state = 'processing'",
                params![unix_timestamp_millis()],
            )
            .await?;
        Ok(affected)
    }

    async fn counts(&self) -> Result<QueueStatus> {
        let mut rows = self
            .conn
            .query(
                "SELECT state, COUNT(*) FROM sync_operations GROUP BY state",
                (),
            )
            .await?;

        let mut status = QueueStatus::default();
        while let Some(row) = rows.next().await? {
            let state: String = row.get(0)?;
            let count = u64::try_from(row.get::<i64>(1)?).unwrap_or_default();
            match state.parse::<QueueState>()? {
                QueueState::Pending => status.pending = count,
                QueueState::Processing => status.processing = count,
                QueueState::Failed => status.failed = count,
            }
        }
        status.total = status.pending + status.processing + status.failed;
        Ok(status)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_operations WHERE id = ?1");
        let mut found = self.query_operations(&sql, [id.as_str()]).await?;
        Ok(found.pop())
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<QueuedOperation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_operations
             WHERE state = 'failed'
             ORDER BY failed_at DESC, seq DESC
             LIMIT ?1"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_operations(&sql, params![limit]).await
    }

    async fn clear(&self) -> Result<u64> {
        let affected = self.conn.execute("DELETE FROM sync_operations", ()).await?;
        Ok(affected)
    }
}

fn optional_text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

fn optional_integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(number) => Some(number),
        _ => None,
    }
}
