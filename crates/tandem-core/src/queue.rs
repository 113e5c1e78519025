//! Durable retry queue.
//!
//! Operations sit in one of three lists (pending, processing, failed) stored
//! as a state column in libSQL. Dequeue is a single `UPDATE … RETURNING`
//! statement, so an operation is never in two lists and a crash while
//! processing leaves it recoverable via [`RetryQueue::requeue_processing`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlQueueRepository, QueueRepository};
use crate::error::Result;
use crate::models::{OperationId, QueueState, QueueStatus, QueuedOperation, SyncOperation};
use crate::util::unix_timestamp_millis;

pub const DEFAULT_FAILED_LIMIT: usize = 100;
/// Age after which failed operations are pruned by default
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone)]
pub struct RetryQueue {
    db: Arc<Mutex<Database>>,
}

impl RetryQueue {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// In-memory queue (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(Arc::new(Mutex::new(db))))
    }

    pub async fn enqueue(&self, operation: &SyncOperation) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.insert(operation, QueueState::Pending, None).await?;
        tracing::debug!(operation_id = %operation.id, "Operation enqueued");
        Ok(())
    }

    /// Move the oldest pending operation to processing and return it.
    pub async fn dequeue(&self) -> Result<Option<QueuedOperation>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.claim_next().await
    }

    /// Remove a finished operation from the queue.
    pub async fn mark_completed(&self, id: &OperationId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let removed = repo.remove(id).await?;
        tracing::debug!(operation_id = %id, removed, "Operation completed");
        Ok(removed)
    }

    /// Move a dequeued operation to the failed list, saving its attempts.
    pub async fn mark_failed(&self, operation: &SyncOperation, error: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let moved = repo.mark_failed(operation, error).await?;
        tracing::warn!(
            operation_id = %operation.id,
            retry_count = operation.retry_count,
            %error,
            "Operation failed"
        );
        Ok(moved)
    }

    /// Park an operation that never went through the queue in the failed list.
    pub async fn record_failed(&self, operation: &SyncOperation, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.insert(operation, QueueState::Failed, Some(error)).await?;
        tracing::warn!(
            operation_id = %operation.id,
            retry_count = operation.retry_count,
            %error,
            "Operation recorded as failed"
        );
        Ok(())
    }

    /// Move failed operations requeued fewer than `max_retries` times back to
    /// pending, counting the requeue. The rest stay parked.
    pub async fn retry_failed_operations(&self, max_retries: u32) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let requeued = repo.requeue_failed(max_retries).await?;
        tracing::info!(requeued, max_retries, "Requeued failed operations");
        Ok(requeued)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.counts().await
    }

    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get(id).await
    }

    /// Failed operations, newest failure first; `None` means 100.
    pub async fn failed_operations(&self, limit: Option<usize>) -> Result<Vec<QueuedOperation>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_failed(limit.unwrap_or(DEFAULT_FAILED_LIMIT)).await
    }

    /// Return operations left in processing by an interrupted run to pending.
    pub async fn requeue_processing(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let recovered = repo.requeue_processing().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered operations left in processing");
        }
        Ok(recovered)
    }

    /// Delete failed operations older than `older_than`.
    pub async fn cleanup_failed(&self, older_than: Duration) -> Result<u64> {
        let age = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = unix_timestamp_millis().saturating_sub(age);
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let removed = repo.delete_failed_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, older_than_secs = older_than.as_secs(), "Pruned old failed operations");
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let cleared = repo.clear().await?;
        tracing::info!(cleared, "Queue cleared");
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeEvent, Direction, Operation, Record, System};
    use serde_json::json;
    use std::collections::HashSet;

    fn operation(n: usize) -> SyncOperation {
        let data: Record = json!({"email": format!("user{n}@example.com")})
            .as_object()
            .cloned()
            .unwrap();
        let event = ChangeEvent::new(System::Supabase, "Employee", n.to_string(), Operation::Update, data);
        SyncOperation::from_event(&event, Direction::SupabaseToFrappe, Operation::Update, "Employee")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle() {
        let queue = RetryQueue::open_in_memory().await.unwrap();
        let op = operation(1);
        queue.enqueue(&op).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.operation.payload, op.payload);
        assert_eq!(queue.status().await.unwrap().processing, 1);

        assert!(queue.mark_completed(&op.id).await.unwrap());
        assert_eq!(queue.status().await.unwrap().total, 0);
        assert!(queue.get_operation(&op.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_operations_are_inspectable_and_retryable() {
        let queue = RetryQueue::open_in_memory().await.unwrap();
        let mut op = operation(2);
        op.record_attempt_failure("HTTP 503");
        queue.record_failed(&op, "HTTP 503").await.unwrap();

        let failed = queue.failed_operations(None).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].operation.retry_count, 1);
        assert_eq!(failed[0].operation.error_message.as_deref(), Some("HTTP 503"));

        assert_eq!(queue.retry_failed_operations(0).await.unwrap(), 0);
        assert_eq!(queue.retry_failed_operations(3).await.unwrap(), 1);
        let status = queue.status().await.unwrap();
        assert_eq!((status.pending, status.failed), (1, 0));

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.requeue_count, 1);
        assert!(queue.mark_failed(&claimed.operation, "HTTP 503").await.unwrap());
        let parked = queue.get_operation(&op.id).await.unwrap().unwrap();
        assert_eq!(parked.state, QueueState::Failed);
        assert_eq!(parked.requeue_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_failed_keeps_recent_failures() {
        let queue = RetryQueue::open_in_memory().await.unwrap();
        let op = operation(4);
        queue.record_failed(&op, "boom").await.unwrap();

        assert_eq!(queue.cleanup_failed(DEFAULT_FAILED_RETENTION).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.cleanup_failed(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(queue.status().await.unwrap().total, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_dequeue_never_hands_out_twice() {
        let queue = RetryQueue::open_in_memory().await.unwrap();
        for n in 0..12 {
            queue.enqueue(&operation(n)).await.unwrap();
        }

        let mut workers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            workers.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(op) = queue.dequeue().await.unwrap() {
                    claimed.push(op.operation.id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.await.unwrap() {
                assert!(seen.insert(id), "operation handed out twice");
            }
        }
        assert_eq!(seen.len(), 12);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recovery_after_interrupted_processing() {
        let queue = RetryQueue::open_in_memory().await.unwrap();
        queue.enqueue(&operation(3)).await.unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(queue.requeue_processing().await.unwrap(), 1);
        assert!(queue.dequeue().await.unwrap().is_some());
        assert_eq!(queue.clear().await.unwrap(), 1);
    }
}
