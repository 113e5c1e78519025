//! In-process [`RecordStore`] for tests and local dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{ClientError, ClientResult, FieldDescriptor, RecordStore};
use crate::models::{Record, System};
use crate::util::scalar_text;

/// Records kept in insertion order per collection.
///
/// Native ids are assigned the way each system does: Frappe documents get a
/// `name` of the form `{collection}-00001`, Supabase rows a UUID `id`.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    system: System,
    collections: Mutex<HashMap<String, Vec<Record>>>,
    next_seq: AtomicU64,
    failing_writes: AtomicU32,
    writes: AtomicU64,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new(system: System) -> Self {
        Self {
            system,
            collections: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            failing_writes: AtomicU32::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Make the next `count` writes fail with a transient 503.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Successful create/update/delete calls so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed a record directly, assigning a native id when it has none.
    pub async fn insert(&self, collection: &str, record: Record) -> Record {
        let record = self.with_native_id(collection, record);
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    pub async fn records(&self, collection: &str) -> Vec<Record> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn with_native_id(&self, collection: &str, mut record: Record) -> Record {
        let id_field = self.system.native_id_field();
        if record.get(id_field).and_then(scalar_text).is_none() {
            let id = match self.system {
                System::Frappe => {
                    let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                    format!("{collection}-{seq:05}")
                }
                System::Supabase => uuid::Uuid::now_v7().to_string(),
            };
            record.insert(id_field.to_string(), Value::String(id));
        }
        record
    }

    fn check_injected_failure(&self) -> ClientResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ClientError::Api {
                status: 503,
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }

    fn position(&self, records: &[Record], id: &str) -> Option<usize> {
        let id_field = self.system.native_id_field();
        records
            .iter()
            .position(|record| record.get(id_field).and_then(scalar_text).as_deref() == Some(id))
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn system(&self) -> System {
        self.system
    }

    async fn get_record(&self, collection: &str, id: &str) -> ClientResult<Option<Record>> {
        let collections = self.collections.lock().await;
        let Some(records) = collections.get(collection) else {
            return Ok(None);
        };
        Ok(self.position(records, id).map(|index| records[index].clone()))
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> ClientResult<Option<Record>> {
        let collections = self.collections.lock().await;
        Ok(collections.get(collection).and_then(|records| {
            records
                .iter()
                .find(|record| record.get(field).and_then(scalar_text).as_deref() == Some(value))
                .cloned()
        }))
    }

    async fn create(&self, collection: &str, data: &Record) -> ClientResult<Record> {
        self.check_injected_failure()?;
        let record = self.insert(collection, data.clone()).await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, data: &Record) -> ClientResult<Record> {
        self.check_injected_failure()?;
        let mut collections = self.collections.lock().await;
        let records = collections.entry(collection.to_string()).or_default();
        let Some(index) = self.position(records, id) else {
            return Err(ClientError::Api {
                status: 404,
                message: format!("{collection} {id} not found"),
            });
        };
        let id_field = self.system.native_id_field();
        for (key, value) in data {
            if key != id_field {
                records[index].insert(key.clone(), value.clone());
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(records[index].clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> ClientResult<bool> {
        self.check_injected_failure()?;
        let mut collections = self.collections.lock().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(index) = self.position(records, id) else {
            return Ok(false);
        };
        records.remove(index);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn get_schema(&self, collection: &str) -> ClientResult<Vec<FieldDescriptor>> {
        let collections = self.collections.lock().await;
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for record in collections.get(collection).into_iter().flatten() {
            for (name, value) in record {
                if fields.iter().any(|field| field.name == *name) {
                    continue;
                }
                let data_type = match value {
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Array(_) => "array",
                    Value::Object(_) => "object",
                    Value::Null => "unknown",
                };
                fields.push(FieldDescriptor {
                    name: name.clone(),
                    data_type: data_type.to_string(),
                    required: name == self.system.native_id_field(),
                });
            }
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn assigns_native_ids_per_system() {
        let frappe = InMemoryRecordStore::new(System::Frappe);
        let created = frappe.create("Employee", &record(json!({"first_name": "Ada"}))).await.unwrap();
        assert_eq!(created["name"], json!("Employee-00001"));

        let supabase = InMemoryRecordStore::new(System::Supabase);
        let created = supabase.create("users", &record(json!({"email": "a@b.c"}))).await.unwrap();
        assert!(created["id"].as_str().is_some_and(|id| id.len() == 36));
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let store = InMemoryRecordStore::new(System::Supabase);
        let row = store
            .insert("users", record(json!({"id": "u1", "email": "a@b.c", "active": true})))
            .await;
        let updated = store
            .update("users", "u1", &record(json!({"id": "other", "active": false})))
            .await
            .unwrap();
        assert_eq!(updated["id"], row["id"]);
        assert_eq!(updated["active"], json!(false));
        assert_eq!(updated["email"], json!("a@b.c"));
    }

    #[tokio::test]
    async fn find_by_field_matches_text_form() {
        let store = InMemoryRecordStore::new(System::Supabase);
        store.insert("users", record(json!({"id": "u1", "age": 42}))).await;
        let found = store.find_by_field("users", "age", "42").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_by_field("users", "age", "7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted_down() {
        let store = InMemoryRecordStore::new(System::Frappe);
        store.fail_next_writes(2);
        let data = record(json!({"subject": "x"}));

        for _ in 0..2 {
            let error = store.create("Task", &data).await.unwrap_err();
            assert!(error.is_transient());
        }
        assert!(store.create("Task", &data).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn delete_reports_missing_records() {
        let store = InMemoryRecordStore::new(System::Frappe);
        store.insert("Task", record(json!({"name": "TASK-1"}))).await;
        assert!(store.delete("Task", "TASK-1").await.unwrap());
        assert!(!store.delete("Task", "TASK-1").await.unwrap());
        assert!(store.records("Task").await.is_empty());
    }
}
