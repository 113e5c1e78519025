//! Background housekeeping of the retry queue: replay failed operations
//! under the requeue cap, drain pending ones, prune old failures.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::SyncEngine;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Operations processed per tick
pub const DRAIN_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub interval: Duration,
    /// Requeue cap passed to replay; 0 leaves failed operations parked
    pub retry_max: u32,
    pub failed_retention: Option<Duration>,
}

pub fn spawn(engine: Arc<SyncEngine>, settings: WorkerSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = settings.interval.as_secs(),
            retry_max = settings.retry_max,
            "Queue worker started"
        );
        loop {
            ticker.tick().await;
            tick(&engine, settings).await;
        }
    })
}

async fn tick(engine: &SyncEngine, settings: WorkerSettings) {
    if settings.retry_max > 0 {
        match engine.retry_failed_operations(settings.retry_max).await {
            Ok(0) => {}
            Ok(requeued) => tracing::info!(requeued, "Failed operations requeued"),
            Err(error) => tracing::error!(error = %error, "Failed to requeue failed operations"),
        }
    }

    match engine.process_queued(DRAIN_BATCH).await {
        Ok(summary) if summary.processed > 0 => {
            tracing::debug!(processed = summary.processed, "Queue worker tick");
        }
        Ok(_) => {}
        Err(error) => tracing::error!(error = %error, "Queue worker pass failed"),
    }

    if let Some(retention) = settings.failed_retention {
        if let Err(error) = engine.cleanup_failed(retention).await {
            tracing::error!(error = %error, "Failed to prune failed operations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::client::InMemoryRecordStore;
    use tandem_core::dedup::WebhookDeduplicator;
    use tandem_core::engine::EngineSettings;
    use tandem_core::mapping::MappingConfig;
    use tandem_core::queue::RetryQueue;
    use tandem_core::store::{LibSqlMappingStore, MappingStore};
    use tandem_core::{ChangeEvent, Direction, Operation, SyncOperation, System};

    fn settings(retry_max: u32) -> WorkerSettings {
        WorkerSettings {
            interval: Duration::from_millis(10),
            retry_max,
            failed_retention: None,
        }
    }

    async fn engine_with(supabase: Arc<InMemoryRecordStore>) -> Arc<SyncEngine> {
        let mappings = LibSqlMappingStore::open_in_memory().await.unwrap();
        let employee: MappingConfig = serde_json::from_value(json!({
            "frappe_doctype": "Employee",
            "supabase_table": "users",
            "field_mappings": {"cell_number": "phone_number"},
            "reverse_mappings": {"phone_number": "cell_number"}
        }))
        .unwrap();
        mappings.put("Employee", employee).await.unwrap();

        Arc::new(SyncEngine::new(
            Arc::new(InMemoryRecordStore::new(System::Frappe)),
            supabase,
            Arc::new(mappings),
            Arc::new(WebhookDeduplicator::default()),
            RetryQueue::open_in_memory().await.unwrap(),
            EngineSettings::default(),
        ))
    }

    fn queued_create(phone: &str) -> SyncOperation {
        let data = json!({"cell_number": phone}).as_object().cloned().unwrap();
        let event = ChangeEvent::new(System::Frappe, "Employee", "HR-EMP-0001", Operation::Update, data);
        SyncOperation::from_event(&event, Direction::FrappeToSupabase, Operation::Create, "users")
    }

    async fn wait_until_empty(engine: &SyncEngine) {
        for _ in 0..200 {
            if engine.queue().status().await.unwrap().total == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_drains_pending_operations() {
        let supabase = Arc::new(InMemoryRecordStore::new(System::Supabase));
        let engine = engine_with(supabase.clone()).await;
        engine.queue().enqueue(&queued_create("9998887777")).await.unwrap();

        let worker = spawn(engine.clone(), settings(3));
        wait_until_empty(&engine).await;
        worker.abort();

        assert_eq!(engine.queue().status().await.unwrap().total, 0);
        assert_eq!(supabase.records("users").await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_replays_parked_failures() {
        let supabase = Arc::new(InMemoryRecordStore::new(System::Supabase));
        let engine = engine_with(supabase.clone()).await;
        let mut operation = queued_create("9998887777");
        for _ in 0..4 {
            operation.record_attempt_failure("HTTP 503");
        }
        engine.queue().record_failed(&operation, "HTTP 503").await.unwrap();

        let worker = spawn(engine.clone(), settings(3));
        wait_until_empty(&engine).await;
        worker.abort();

        assert_eq!(engine.queue().status().await.unwrap().total, 0);
        assert_eq!(supabase.records("users").await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_leaves_failures_parked_when_replay_disabled() {
        let supabase = Arc::new(InMemoryRecordStore::new(System::Supabase));
        let engine = engine_with(supabase.clone()).await;
        engine
            .queue()
            .record_failed(&queued_create("9998887777"), "HTTP 503")
            .await
            .unwrap();

        tick(&engine, settings(0)).await;
        assert_eq!(engine.queue().status().await.unwrap().failed, 1);
        assert!(supabase.records("users").await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_prunes_failures_past_retention() {
        let supabase = Arc::new(InMemoryRecordStore::new(System::Supabase));
        let engine = engine_with(supabase).await;
        engine
            .queue()
            .record_failed(&queued_create("9998887777"), "HTTP 503")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let pruning = WorkerSettings {
            failed_retention: Some(Duration::ZERO),
            ..settings(0)
        };
        tick(&engine, pruning).await;
        assert_eq!(engine.queue().status().await.unwrap().total, 0);
    }
}
