use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tandem_core::dedup::DedupStats;
use tandem_core::mapping::MappingConfig;
use tandem_core::models::{QueueStatus, QueuedOperation};
use tandem_core::store::MappingStore as _;
use tandem_core::{ChangeEvent, OperationId, SyncEngine, SyncOutcome};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::webhook::{
    frappe_event, verify_signature, SupabasePayload, FRAPPE_SIGNATURE_HEADER,
    SUPABASE_SIGNATURE_HEADERS,
};

const DEFAULT_RETRY_MAX: u32 = 3;
const DEFAULT_CLEANUP_DAYS: u32 = 7;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<SyncEngine>,
    frappe_webhook_token: Arc<str>,
    webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>, frappe_webhook_token: &str, webhook_secret: &str) -> Self {
        Self {
            engine,
            frappe_webhook_token: Arc::from(frappe_webhook_token),
            webhook_secret: Arc::from(webhook_secret),
        }
    }

    pub fn from_config(engine: Arc<SyncEngine>, config: &AppConfig) -> Self {
        Self::new(engine, &config.frappe_webhook_token, &config.webhook_secret)
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/status", get(sync_status))
        .route("/retry-failed", post(retry_failed))
        .route("/cleanup", post(cleanup_failed))
        .route("/mappings", get(list_mappings))
        .route(
            "/mappings/{name}",
            get(get_mapping).put(put_mapping).delete(delete_mapping),
        )
        .route("/operations/failed", get(failed_operations))
        .route("/operations/{id}", get(get_operation));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/frappe", post(frappe_webhook))
        .route("/webhook/supabase", post(supabase_webhook))
        .nest("/sync", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

/// Acknowledgement sent back to the system that fired the webhook
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WebhookResponse {
    Received {
        event_id: String,
        sync_result: SyncOutcome,
    },
    Skipped {
        reason: &'static str,
    },
}

async fn dispatch(state: &AppState, event: ChangeEvent) -> WebhookResponse {
    tracing::info!(
        event_id = %event.id,
        source = %event.source,
        record_type = %event.record_type,
        operation = %event.operation,
        "Webhook received"
    );
    let sync_result = state.engine.process_event(&event).await;
    WebhookResponse::Received {
        event_id: event.id.to_string(),
        sync_result,
    }
}

async fn frappe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    verify_signature(
        &headers,
        &[FRAPPE_SIGNATURE_HEADER],
        &state.frappe_webhook_token,
        &body,
    )?;
    let event = frappe_event(&body)?;
    Ok(Json(dispatch(&state, event).await))
}

async fn supabase_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    verify_signature(
        &headers,
        &SUPABASE_SIGNATURE_HEADERS,
        &state.webhook_secret,
        &body,
    )?;
    let payload = SupabasePayload::parse(&body)?;

    let Some((_, mapping)) = state.engine.mappings().find_by_table(&payload.table).await? else {
        tracing::info!(table = %payload.table, "Table not configured for sync, skipping");
        return Ok(Json(WebhookResponse::Skipped {
            reason: "table_not_configured",
        }));
    };
    let event = payload.into_event(&mapping.frappe_doctype)?;
    Ok(Json(dispatch(&state, event).await))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    queue: QueueStatus,
    dedup: DedupStats,
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    Ok(Json(StatusResponse {
        queue: state.engine.queue().status().await?,
        dedup: state.engine.dedup().stats().await,
    }))
}

#[derive(Debug, Deserialize)]
struct RetryQuery {
    max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RetryResponse {
    requeued: u64,
    max_retries: u32,
}

async fn retry_failed(
    State(state): State<AppState>,
    Query(query): Query<RetryQuery>,
) -> Result<Json<RetryResponse>, AppError> {
    let max_retries = query.max_retries.unwrap_or(DEFAULT_RETRY_MAX);
    let requeued = state.engine.retry_failed_operations(max_retries).await?;
    Ok(Json(RetryResponse {
        requeued,
        max_retries,
    }))
}

#[derive(Debug, Deserialize)]
struct CleanupQuery {
    days: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    removed: u64,
    days: u32,
}

async fn cleanup_failed(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, AppError> {
    let days = query.days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    let older_than = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let removed = state.engine.cleanup_failed(older_than).await?;
    Ok(Json(CleanupResponse { removed, days }))
}

#[derive(Debug, Serialize)]
struct MappingEntry {
    name: String,
    mapping: MappingConfig,
}

async fn list_mappings(State(state): State<AppState>) -> Result<Json<Vec<MappingEntry>>, AppError> {
    let mappings = state.engine.mappings().list().await?;
    Ok(Json(
        mappings
            .into_iter()
            .map(|(name, mapping)| MappingEntry { name, mapping })
            .collect(),
    ))
}

async fn get_mapping(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MappingEntry>, AppError> {
    let mapping = state
        .engine
        .mappings()
        .get(&name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Mapping '{name}'")))?;
    Ok(Json(MappingEntry { name, mapping }))
}

async fn put_mapping(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mapping): Json<MappingConfig>,
) -> Result<Json<MappingEntry>, AppError> {
    state.engine.mappings().put(&name, mapping.clone()).await?;
    // Cached lookups may resolve against the old match fields
    state.engine.mapper().clear_cache().await;
    Ok(Json(MappingEntry { name, mapping }))
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted: bool,
}

async fn delete_mapping(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    if !state.engine.mappings().delete(&name).await? {
        return Err(AppError::not_found(format!("Mapping '{name}'")));
    }
    state.engine.mapper().clear_cache().await;
    Ok(Json(DeletedResponse { deleted: true }))
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    limit: Option<usize>,
}

async fn failed_operations(
    State(state): State<AppState>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<QueuedOperation>>, AppError> {
    Ok(Json(state.engine.queue().failed_operations(query.limit).await?))
}

async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueuedOperation>, AppError> {
    let operation_id: OperationId = id
        .parse()
        .map_err(|_| AppError::bad_request(format!("Invalid operation id: {id}")))?;
    let operation = state
        .engine
        .queue()
        .get_operation(&operation_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Operation {id}")))?;
    Ok(Json(operation))
}
