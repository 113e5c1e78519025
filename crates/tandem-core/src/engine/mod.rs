//! The sync engine.
//!
//! [`SyncEngine::process_event`] takes one normalized change event through
//! the deduplication gates, mapping lookup and direction checks, decides
//! between create, update and delete, and writes the mapped record to the
//! other system. Failed writes are retried inline with backoff and then
//! parked in the durable queue for a later [`SyncEngine::process_queued`]
//! or operator-triggered replay.

mod outcome;
mod single_flight;


pub use outcome::{DeleteMiss, SkipReason, SyncOutcome, WriteResult};
pub use single_flight::{IdentityGuard, IdentityLocks};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::client::{ClientError, RecordStore};
use crate::conflict::{ConflictResolver, Resolution};
use crate::dedup::WebhookDeduplicator;
use crate::error::{Error, Result};
use crate::identity::{identify, Identity};
use crate::mapping::{MappingConfig, MappingEngine};
use crate::models::{ChangeEvent, Direction, Operation, Record, SyncConflict, SyncOperation};
use crate::queue::RetryQueue;
use crate::retry::RetryPolicy;
use crate::store::MappingStore;
use crate::util::scalar_text;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Inline retry schedule for target writes
    pub retry: RetryPolicy,
    /// Upper bound on one operation, retries included
    pub operation_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Counts from one pass over the pending queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueRunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

enum Attempt {
    Written(WriteResult),
    Manual(SyncConflict),
}

pub struct SyncEngine {
    mapper: MappingEngine,
    mappings: Arc<dyn MappingStore>,
    dedup: Arc<WebhookDeduplicator>,
    queue: RetryQueue,
    resolver: ConflictResolver,
    locks: IdentityLocks,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(
        frappe: Arc<dyn RecordStore>,
        supabase: Arc<dyn RecordStore>,
        mappings: Arc<dyn MappingStore>,
        dedup: Arc<WebhookDeduplicator>,
        queue: RetryQueue,
        settings: EngineSettings,
    ) -> Self {
        Self {
            mapper: MappingEngine::new(frappe, supabase),
            mappings,
            dedup,
            queue,
            resolver: ConflictResolver::new(),
            locks: IdentityLocks::new(),
            settings,
        }
    }

    pub const fn mapper(&self) -> &MappingEngine {
        &self.mapper
    }

    pub fn mappings(&self) -> &Arc<dyn MappingStore> {
        &self.mappings
    }

    pub fn dedup(&self) -> &WebhookDeduplicator {
        &self.dedup
    }

    pub const fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Sync one change event to the other system.
    ///
    /// Never fails: every way an event can end is a [`SyncOutcome`].
    pub async fn process_event(&self, event: &ChangeEvent) -> SyncOutcome {
        let record_type = event.record_type.as_str();

        if self.dedup.is_duplicate(event.source, record_type, &event.data).await {
            tracing::info!(event_id = %event.id, source = %event.source, record_type, "Duplicate webhook skipped");
            return SyncOutcome::skipped(SkipReason::DuplicateWebhook);
        }
        if self
            .dedup
            .is_opposite_service_webhook(event.source, record_type, &event.data)
            .await
        {
            tracing::info!(
                event_id = %event.id,
                source = %event.source,
                record_type,
                "Echo of a recent sync skipped"
            );
            return SyncOutcome::skipped(SkipReason::OppositeServiceWebhookAfterSync);
        }

        let mapping = match self.find_mapping(record_type).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                tracing::info!(record_type, "No mapping configured, skipping");
                return SyncOutcome::skipped(SkipReason::NoMapping);
            }
            Err(error) => {
                tracing::error!(record_type, error = %error, "Failed to load mapping");
                return SyncOutcome::Error {
                    operation_id: None,
                    error: error.to_string(),
                };
            }
        };
        if !mapping.enabled {
            tracing::info!(record_type, "Mapping disabled, skipping");
            return SyncOutcome::skipped(SkipReason::MappingDisabled);
        }
        let Some(direction) = resolve_direction(event, &mapping) else {
            return SyncOutcome::skipped(SkipReason::DirectionNotAllowed);
        };

        let identity = identify(record_type, &event.data, event.source, Some(direction.target()));
        let _guard = self.lock_identity(record_type, identity.as_ref()).await;

        let operation_type = self.resolve_operation(event, &mapping, direction).await;
        let mut operation = SyncOperation::from_event(
            event,
            direction,
            operation_type,
            mapping.collection(direction.target()),
        );
        tracing::info!(
            event_id = %event.id,
            operation_id = %operation.id,
            record_type,
            %direction,
            operation = %operation_type,
            "Sync started"
        );

        match self.run_with_retry(&mut operation, &mapping).await {
            Ok(Attempt::Written(result)) => {
                operation.mark_completed();
                self.dedup
                    .record_successful_sync(event.source, record_type, &event.data)
                    .await;
                tracing::info!(
                    operation_id = %operation.id,
                    action = result.action(),
                    retries = operation.retry_count,
                    "Sync completed"
                );
                SyncOutcome::Success {
                    operation_id: operation.id,
                    result,
                }
            }
            Ok(Attempt::Manual(conflict)) => SyncOutcome::Conflict {
                operation_id: operation.id,
                conflict_id: conflict.id,
                conflict_fields: conflict.conflict_fields,
                requires_manual_resolution: true,
            },
            Err(error) => {
                operation.mark_failed(error.clone());
                self.park_failed(&operation, &error).await;
                SyncOutcome::Error {
                    operation_id: Some(operation.id),
                    error,
                }
            }
        }
    }

    /// Run up to `limit` pending queue entries through the engine.
    ///
    /// Operations that fail again, or stop at a manual conflict, go back to
    /// the failed list with their attempts carried forward. One bad entry
    /// never stops the pass; only a failing dequeue does.
    pub async fn process_queued(&self, limit: usize) -> Result<QueueRunSummary> {
        let mut summary = QueueRunSummary::default();

        for _ in 0..limit {
            let Some(queued) = self.queue.dequeue().await? else {
                break;
            };
            let mut operation = queued.operation;
            summary.processed += 1;

            match self.replay(&mut operation).await {
                Ok(result) => {
                    operation.mark_completed();
                    if let Err(error) = self.queue.mark_completed(&operation.id).await {
                        tracing::error!(
                            operation_id = %operation.id,
                            error = %error,
                            "Failed to mark queued operation completed"
                        );
                    }
                    self.dedup
                        .record_successful_sync(
                            operation.source_system,
                            &operation.record_type,
                            &operation.payload,
                        )
                        .await;
                    tracing::info!(
                        operation_id = %operation.id,
                        action = result.action(),
                        "Queued operation completed"
                    );
                    summary.succeeded += 1;
                }
                Err(error) => {
                    operation.mark_failed(error.clone());
                    if let Err(queue_error) = self.queue.mark_failed(&operation, &error).await {
                        tracing::error!(
                            operation_id = %operation.id,
                            error = %queue_error,
                            "Failed to park queued operation"
                        );
                    }
                    summary.failed += 1;
                }
            }
        }

        if summary.processed > 0 {
            tracing::info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Queue pass finished"
            );
        }
        Ok(summary)
    }

    /// One queued operation, end to end. Errors come back as the message
    /// stored on the failed entry.
    async fn replay(&self, operation: &mut SyncOperation) -> std::result::Result<WriteResult, String> {
        let mapping = match self.find_mapping(&operation.record_type).await {
            Ok(Some(mapping)) if mapping.enabled => mapping,
            Ok(_) => return Err(format!("No enabled mapping for {}", operation.record_type)),
            Err(error) => {
                tracing::error!(operation_id = %operation.id, error = %error, "Failed to load mapping");
                return Err(error.to_string());
            }
        };

        let identity = identify(
            &operation.record_type,
            &operation.payload,
            operation.source_system,
            Some(operation.target_system),
        );
        let _guard = self
            .lock_identity(&operation.record_type, identity.as_ref())
            .await;

        match self.run_with_retry(operation, &mapping).await? {
            Attempt::Written(result) => Ok(result),
            Attempt::Manual(conflict) => Err(format!(
                "Conflict {} requires manual resolution",
                conflict.id
            )),
        }
    }

    /// Move failed operations requeued fewer than `max_retries` times back
    /// to pending.
    pub async fn retry_failed_operations(&self, max_retries: u32) -> Result<u64> {
        self.queue.retry_failed_operations(max_retries).await
    }

    /// Delete failed operations older than `older_than`.
    pub async fn cleanup_failed(&self, older_than: Duration) -> Result<u64> {
        self.queue.cleanup_failed(older_than).await
    }

    /// Requeue anything a previous run left in processing.
    pub async fn recover(&self) -> Result<u64> {
        self.queue.requeue_processing().await
    }

    /// Mapping by name, falling back to the one whose doctype is `record_type`.
    async fn find_mapping(&self, record_type: &str) -> Result<Option<MappingConfig>> {
        if let Some(mapping) = self.mappings.get(record_type).await? {
            return Ok(Some(mapping));
        }
        Ok(self
            .mappings
            .list()
            .await?
            .into_iter()
            .map(|(_, mapping)| mapping)
            .find(|mapping| mapping.frappe_doctype == record_type))
    }

    async fn lock_identity(
        &self,
        record_type: &str,
        identity: Option<&Identity>,
    ) -> Option<IdentityGuard> {
        match identity {
            Some(identity) => Some(self.locks.acquire(record_type, &identity.to_string()).await),
            None => None,
        }
    }

    /// Create vs update is decided by whether the target already holds the
    /// record; deletes pass through.
    async fn resolve_operation(
        &self,
        event: &ChangeEvent,
        mapping: &MappingConfig,
        direction: Direction,
    ) -> Operation {
        if event.operation == Operation::Delete {
            return Operation::Delete;
        }

        let existing = match self
            .mapper
            .map_fields(Some(&event.data), direction.source(), direction.target(), mapping)
            .await
        {
            Ok(mapped) => {
                let mapped = mapped.unwrap_or_default();
                self.lookup_target(&event.record_type, &event.data, &mapped, direction, mapping)
                    .await
            }
            Err(error) => Err(error),
        };

        match existing {
            Ok(Some(_)) => Operation::Update,
            Ok(None) => Operation::Create,
            Err(error) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %error,
                    "Could not determine operation type, defaulting to create"
                );
                Operation::Create
            }
        }
    }

    /// Find the target record that corresponds to `payload`.
    async fn lookup_target(
        &self,
        record_type: &str,
        payload: &Record,
        mapped: &Record,
        direction: Direction,
        mapping: &MappingConfig,
    ) -> Result<Option<Record>> {
        let target = direction.target();
        let Some(identity) = target_identity(record_type, payload, mapped, direction) else {
            tracing::debug!(record_type, "No business key, treating record as new");
            return Ok(None);
        };
        let key = identity.business_key(target);
        let store = self.mapper.store(target);
        let collection = mapping.collection(target);

        for value in lookup_values(key.field, &key.value, mapped) {
            if let Some(candidate) = store.find_by_field(collection, key.field, &value).await? {
                if key.matches(&candidate) {
                    return Ok(Some(candidate));
                }
                tracing::debug!(
                    record_type,
                    field = key.field,
                    "Candidate description does not match, treating record as new"
                );
                return Ok(None);
            }
        }
        Ok(None)
    }

    async fn run_with_retry(
        &self,
        operation: &mut SyncOperation,
        mapping: &MappingConfig,
    ) -> std::result::Result<Attempt, String> {
        let policy = self.settings.retry;
        let timeout = self.settings.operation_timeout;
        let attempts = policy.attempts();

        let run = async {
            let mut last_error = String::new();
            for attempt in 0..attempts {
                operation.mark_in_progress();
                match self.execute(operation, mapping).await {
                    Ok(result) => return Ok(result),
                    Err(error) => {
                        let message = error.to_string();
                        operation.record_attempt_failure(message.clone());
                        tracing::warn!(
                            operation_id = %operation.id,
                            attempt = attempt + 1,
                            attempts,
                            error = %message,
                            "Sync attempt failed"
                        );
                        if matches!(error, Error::InvalidDirection { .. }) {
                            return Err(message);
                        }
                        last_error = message;
                        if attempt + 1 < attempts {
                            tokio::time::sleep(policy.delay_for(attempt)).await;
                        }
                    }
                }
            }
            Err(format!("Operation failed after {attempts} attempts: {last_error}"))
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "operation exceeded {}ms",
                timeout.as_millis()
            ))
            .to_string()),
        }
    }

    /// One attempt at writing `operation` to its target.
    async fn execute(&self, operation: &SyncOperation, mapping: &MappingConfig) -> Result<Attempt> {
        let direction = operation.direction;
        let mapped = self
            .mapper
            .map_fields(
                Some(&operation.payload),
                operation.source_system,
                operation.target_system,
                mapping,
            )
            .await?
            .unwrap_or_default();

        if operation.operation == Operation::Delete {
            return Ok(Attempt::Written(
                self.delete_target(operation, &mapped, mapping).await?,
            ));
        }

        let existing = self
            .lookup_target(
                &operation.record_type,
                &operation.payload,
                &mapped,
                direction,
                mapping,
            )
            .await?;

        let mut payload = mapped;
        if let Some(current) = &existing {
            if let Some(mut conflict) = self.resolver.detect(
                operation.id,
                direction,
                &payload,
                &operation.payload,
                current,
                mapping,
            ) {
                match self.resolver.resolve(&mut conflict, direction, &payload, current) {
                    Resolution::Resolved(resolved) => payload = resolved,
                    Resolution::Manual => return Ok(Attempt::Manual(conflict)),
                }
            }
        }

        // What the target holds now decides, not what was seen at enqueue time
        let result = match (&existing, operation.operation) {
            (None, Operation::Create) => self.create_target(operation, &payload).await?,
            _ => {
                self.update_target(operation, &payload, existing.as_ref())
                    .await?
            }
        };
        Ok(Attempt::Written(result))
    }

    async fn create_target(&self, operation: &SyncOperation, payload: &Record) -> Result<WriteResult> {
        let store = self.mapper.store(operation.target_system);
        let record = store.create(&operation.target_collection, payload).await?;
        tracing::debug!(
            operation_id = %operation.id,
            collection = %operation.target_collection,
            "Created target record"
        );
        Ok(WriteResult::Created { record })
    }

    /// Update the record found for this identity, creating it when the
    /// target has nothing to update.
    async fn update_target(
        &self,
        operation: &SyncOperation,
        payload: &Record,
        existing: Option<&Record>,
    ) -> Result<WriteResult> {
        let id_field = operation.target_system.native_id_field();
        let Some(id) = existing.and_then(|record| record.get(id_field)).and_then(scalar_text) else {
            tracing::info!(
                operation_id = %operation.id,
                "Target record not found for update, creating instead"
            );
            return self.create_target(operation, payload).await;
        };

        let store = self.mapper.store(operation.target_system);
        let record = store
            .update(&operation.target_collection, &id, payload)
            .await?;
        tracing::debug!(operation_id = %operation.id, %id, "Updated target record");
        Ok(WriteResult::Updated { id, record })
    }

    async fn delete_target(
        &self,
        operation: &SyncOperation,
        mapped: &Record,
        mapping: &MappingConfig,
    ) -> Result<WriteResult> {
        let target = operation.target_system;
        let lookup = match &mapping.delete_key {
            Some(field) => mapped
                .get(field)
                .and_then(scalar_text)
                .map(|value| (field.clone(), vec![value])),
            None => target_identity(
                &operation.record_type,
                &operation.payload,
                mapped,
                operation.direction,
            )
            .map(|identity| {
                let key = identity.business_key(target);
                let values = lookup_values(key.field, &key.value, mapped);
                (key.field.to_string(), values)
            }),
        };

        let Some((field, values)) = lookup else {
            tracing::warn!(operation_id = %operation.id, "No lookup key for delete");
            return Ok(WriteResult::Deleted {
                deleted: false,
                id: None,
                reason: Some(DeleteMiss::NoLookupKey),
            });
        };

        let store = self.mapper.store(target);
        let mut found = None;
        for value in &values {
            found = store
                .find_by_field(&operation.target_collection, &field, value)
                .await?;
            if found.is_some() {
                break;
            }
        }
        let Some(found) = found else {
            tracing::info!(operation_id = %operation.id, %field, "Nothing to delete in target");
            return Ok(WriteResult::Deleted {
                deleted: false,
                id: None,
                reason: Some(DeleteMiss::RecordNotFound),
            });
        };

        let Some(id) = found.get(target.native_id_field()).and_then(scalar_text) else {
            return Err(ClientError::InvalidPayload(format!(
                "{} record without {}",
                operation.target_collection,
                target.native_id_field()
            ))
            .into());
        };
        let deleted = store.delete(&operation.target_collection, &id).await?;
        tracing::info!(operation_id = %operation.id, %id, deleted, "Deleted target record");
        Ok(WriteResult::Deleted {
            deleted,
            id: Some(id),
            reason: (!deleted).then_some(DeleteMiss::RecordNotFound),
        })
    }

    async fn park_failed(&self, operation: &SyncOperation, error: &str) {
        if let Err(queue_error) = self.queue.record_failed(operation, error).await {
            tracing::error!(
                operation_id = %operation.id,
                error = %queue_error,
                "Failed to record operation in the failed queue"
            );
        }
    }
}

/// Direction for `event` under `mapping`, or `None` when it must not sync.
fn resolve_direction(event: &ChangeEvent, mapping: &MappingConfig) -> Option<Direction> {
    let direction = Direction::from_source(event.source);
    if mapping.collection(direction.target()).trim().is_empty() {
        tracing::info!(record_type = %event.record_type, %direction, "Mapping has no target collection");
        return None;
    }
    if let Some(origin) = event.original_source {
        if origin != event.source && direction.target() == origin {
            tracing::info!(
                event_id = %event.id,
                source = %event.source,
                %origin,
                "Skipping reverse sync to prevent loop"
            );
            return None;
        }
    }
    if !mapping.allows(direction) {
        tracing::info!(record_type = %event.record_type, %direction, "Direction not allowed by mapping");
        return None;
    }
    Some(direction)
}

/// Identity in the target's vocabulary, falling back to the source payload.
fn target_identity(
    record_type: &str,
    payload: &Record,
    mapped: &Record,
    direction: Direction,
) -> Option<Identity> {
    identify(record_type, mapped, direction.target(), None)
        .or_else(|| identify(record_type, payload, direction.source(), Some(direction.target())))
}

/// Values to try for a business-key lookup: the mapped value as written,
/// then the normalized key.
fn lookup_values(field: &str, normalized: &str, mapped: &Record) -> Vec<String> {
    let mut values = Vec::with_capacity(2);
    if let Some(raw) = mapped.get(field).and_then(scalar_text) {
        values.push(raw);
    }
    if !values.iter().any(|value| value == normalized) {
        values.push(normalized.to_string());
    }
    values
}
