use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde_json::json;
use tandem_core::models::{QueueState, QueueStatus, QueuedOperation};
use tandem_core::store::MappingStore;
use tandem_core::{ChangeEvent, Direction, Operation, Record, SyncOperation, System};

use crate::commands::cleanup::run_cleanup;
use crate::commands::clear::run_clear;
use crate::commands::common::{
    failed_to_list_item, format_failed_lines, format_mapping_lines, format_status_lines,
    format_timestamp, open_stores, parse_operation_id, resolve_db_path, truncate,
};
use crate::commands::mappings::{run_mappings_delete, run_mappings_import, run_mappings_show};
use crate::commands::retry::run_retry_failed;
use crate::commands::show::run_show;
use crate::error::CliError;

fn employee_operation() -> SyncOperation {
    let data: Record = json!({"name": "HR-EMP-0001", "cell_number": "(555) 123-4567"})
        .as_object()
        .cloned()
        .unwrap();
    let event = ChangeEvent::new(
        System::Frappe,
        "Employee",
        "HR-EMP-0001",
        Operation::Create,
        data,
    );
    SyncOperation::from_event(&event, Direction::FrappeToSupabase, Operation::Create, "users")
}

fn failed(operation: SyncOperation, failed_at: Option<i64>) -> QueuedOperation {
    QueuedOperation {
        operation,
        state: QueueState::Failed,
        requeue_count: 1,
        enqueued_at: 0,
        failed_at,
        retry_at: None,
    }
}

const EMPLOYEE_MAPPINGS: &str = r#"{"Employee": {
    "frappe_doctype": "Employee",
    "supabase_table": "users",
    "field_mappings": {"cell_number": "phone_number"},
    "reverse_mappings": {"phone_number": "cell_number"}
}}"#;

#[test]
fn resolve_db_path_prefers_flag() {
    let explicit = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn parse_operation_id_rejects_garbage() {
    let id = tandem_core::OperationId::new();
    assert_eq!(parse_operation_id(&format!("  {id} ")).unwrap(), id);
    assert!(matches!(
        parse_operation_id("not-a-uuid"),
        Err(CliError::InvalidOperationId(raw)) if raw == "not-a-uuid"
    ));
}

#[test]
fn format_timestamp_renders_utc() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
}

#[test]
fn truncate_collapses_whitespace_and_shortens() {
    assert_eq!(truncate("short  \n message", 60), "short message");
    assert_eq!(truncate("abcdefghij", 6), "abc...");
}

#[test]
fn status_lines_list_every_queue() {
    let status = QueueStatus {
        pending: 2,
        processing: 1,
        failed: 3,
        total: 6,
    };
    assert_eq!(
        format_status_lines(&status),
        vec![
            "pending:    2".to_string(),
            "processing: 1".to_string(),
            "failed:     3".to_string(),
            "total:      6".to_string(),
        ]
    );
}

#[test]
fn failed_lines_show_placeholder_when_empty() {
    assert_eq!(format_failed_lines(&[]), vec!["No failed operations.".to_string()]);
}

#[test]
fn failed_lines_include_error_and_retries() {
    let mut operation = employee_operation();
    operation.retry_count = 2;
    operation.error_message = Some("Operation failed after 3 attempts: boom".into());
    let id = operation.id;

    let lines = format_failed_lines(&[failed(operation, Some(0))]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with(&id.to_string()));
    assert!(lines[0].contains("1970-01-01 00:00:00 UTC"));
    assert!(lines[0].contains("create Employee HR-EMP-0001"));
    assert!(lines[0].contains("retries=2 requeues=1"));
    assert!(lines[0].ends_with("Operation failed after 3 attempts: boom"));
}

#[test]
fn failed_list_item_carries_iso_time() {
    let mut operation = employee_operation();
    operation.error_message = Some("boom".into());
    let item = failed_to_list_item(&failed(operation, Some(1_700_000_000_000)));
    assert_eq!(item.record_type, "Employee");
    assert_eq!(item.operation, "create");
    assert_eq!(item.error.as_deref(), Some("boom"));
    assert_eq!(item.requeue_count, 1);
    assert_eq!(item.failed_at_iso.as_deref(), Some("2023-11-14 22:13:20 UTC"));
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_lines_mark_disabled_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("mappings.json");
    std::fs::write(&file, EMPLOYEE_MAPPINGS).unwrap();
    let db_path = dir.path().join("tandem.db");

    run_mappings_import(&file, &db_path).await.unwrap();
    let stores = open_stores(&db_path).await.unwrap();
    let mut employee = stores.mappings.get("Employee").await.unwrap().unwrap();
    employee.enabled = false;
    stores.mappings.put("Employee", employee).await.unwrap();

    let lines = format_mapping_lines(&stores.mappings.list().await.unwrap());
    assert_eq!(
        lines,
        vec!["Employee  Employee <-> users  bidirectional  last_modified_wins  (disabled)".to_string()]
    );
    assert_eq!(format_mapping_lines(&[]), vec!["No mappings configured.".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_commands_import_show_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("mappings.json");
    std::fs::write(&file, EMPLOYEE_MAPPINGS).unwrap();
    let db_path = dir.path().join("tandem.db");

    run_mappings_import(&file, &db_path).await.unwrap();
    run_mappings_show("Employee", &db_path).await.unwrap();
    assert!(matches!(
        run_mappings_show("Task", &db_path).await,
        Err(CliError::MappingNotFound(name)) if name == "Task"
    ));

    run_mappings_delete("Employee", &db_path).await.unwrap();
    assert!(matches!(
        run_mappings_delete("Employee", &db_path).await,
        Err(CliError::MappingNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_import_rejects_invalid_documents() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("mappings.json");
    std::fs::write(&file, r#"{"Broken": {"frappe_doctype": "Employee"}}"#).unwrap();
    let db_path = dir.path().join("tandem.db");

    assert!(matches!(
        run_mappings_import(&file, &db_path).await,
        Err(CliError::Core(tandem_core::Error::InvalidInput(_)))
    ));
    let stores = open_stores(&db_path).await.unwrap();
    assert!(stores.mappings.list().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn show_reports_missing_operations() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tandem.db");
    let missing = tandem_core::OperationId::new();

    assert!(matches!(
        run_show(&missing.to_string(), &db_path).await,
        Err(CliError::OperationNotFound(_))
    ));
    assert!(matches!(
        run_show("nope", &db_path).await,
        Err(CliError::InvalidOperationId(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_failed_requeues_parked_operations() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tandem.db");
    let operation = employee_operation();
    let id = operation.id;
    {
        let stores = open_stores(&db_path).await.unwrap();
        stores.queue.record_failed(&operation, "boom").await.unwrap();
    }

    run_show(&id.to_string(), &db_path).await.unwrap();
    run_retry_failed(3, &db_path).await.unwrap();

    let stores = open_stores(&db_path).await.unwrap();
    let status = stores.queue.status().await.unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.failed, 0);
    let queued = stores.queue.get_operation(&id).await.unwrap().unwrap();
    assert_eq!(queued.operation.retry_count, 1);
    assert_eq!(queued.requeue_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_removes_only_old_failures() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tandem.db");
    {
        let stores = open_stores(&db_path).await.unwrap();
        stores.queue.record_failed(&employee_operation(), "boom").await.unwrap();
        stores.queue.enqueue(&employee_operation()).await.unwrap();
    }

    run_cleanup(7, &db_path).await.unwrap();
    let stores = open_stores(&db_path).await.unwrap();
    assert_eq!(stores.queue.status().await.unwrap().failed, 1);
    drop(stores);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    run_cleanup(0, &db_path).await.unwrap();
    let stores = open_stores(&db_path).await.unwrap();
    let status = stores.queue.status().await.unwrap();
    assert_eq!((status.failed, status.pending), (0, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tandem.db");
    {
        let stores = open_stores(&db_path).await.unwrap();
        stores.queue.enqueue(&employee_operation()).await.unwrap();
    }

    assert!(matches!(
        run_clear(false, &db_path).await,
        Err(CliError::ConfirmationRequired)
    ));
    let stores = open_stores(&db_path).await.unwrap();
    assert_eq!(stores.queue.status().await.unwrap().total, 1);
    drop(stores);

    run_clear(true, &db_path).await.unwrap();
    let stores = open_stores(&db_path).await.unwrap();
    assert_eq!(stores.queue.status().await.unwrap().total, 0);
}
