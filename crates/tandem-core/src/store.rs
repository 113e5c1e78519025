//! Mapping configuration store.
//!
//! The engine reads a mapping on every event, so edits made through the API
//! or CLI apply to the next webhook without a restart.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlMappingRepository, MappingRepository};
use crate::error::{Error, Result};
use crate::mapping::MappingConfig;

/// Named set of per-record-type mapping documents
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<MappingConfig>>;

    async fn list(&self) -> Result<Vec<(String, MappingConfig)>>;

    /// Validate and store a document under `name`
    async fn put(&self, name: &str, config: MappingConfig) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<bool>;

    /// Mapping whose Supabase table is `table`
    async fn find_by_table(&self, table: &str) -> Result<Option<(String, MappingConfig)>>;
}

/// [`MappingStore`] persisted in the `sync_mappings` table
#[derive(Clone)]
pub struct LibSqlMappingStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlMappingStore {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// In-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(Arc::new(Mutex::new(db))))
    }

    /// Load a JSON object of `{name: mapping}` documents from `path`.
    ///
    /// Every document is validated before any is stored. Returns the number
    /// of documents imported.
    pub async fn import_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let documents: BTreeMap<String, MappingConfig> = serde_json::from_str(&contents)?;

        for (name, config) in &documents {
            config
                .validate()
                .map_err(|error| Error::InvalidInput(format!("Mapping '{name}': {error}")))?;
        }

        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        for (name, config) in &documents {
            repo.upsert(name, config).await?;
        }

        tracing::info!(
            path = %path.display(),
            count = documents.len(),
            "Imported mapping documents"
        );
        Ok(documents.len())
    }
}

#[async_trait]
impl MappingStore for LibSqlMappingStore {
    async fn get(&self, name: &str) -> Result<Option<MappingConfig>> {
        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        repo.get(name).await
    }

    async fn list(&self) -> Result<Vec<(String, MappingConfig)>> {
        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        repo.list().await
    }

    async fn put(&self, name: &str, config: MappingConfig) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Mapping name must not be empty".into()));
        }
        config.validate()?;

        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        repo.upsert(name, &config).await?;
        tracing::info!(mapping = name, doctype = %config.frappe_doctype, "Mapping saved");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        let deleted = repo.delete(name).await?;
        if deleted {
            tracing::info!(mapping = name, "Mapping deleted");
        }
        Ok(deleted)
    }

    async fn find_by_table(&self, table: &str) -> Result<Option<(String, MappingConfig)>> {
        let db = self.db.lock().await;
        let repo = LibSqlMappingRepository::new(db.connection());
        repo.find_by_table(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn employee() -> MappingConfig {
        serde_json::from_value(json!({
            "frappe_doctype": "Employee",
            "supabase_table": "users",
            "field_mappings": {"cell_number": "phone_number"},
            "reverse_mappings": {"phone_number": "cell_number"}
        }))
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_validates() {
        let store = LibSqlMappingStore::open_in_memory().await.unwrap();
        let invalid = MappingConfig::new("Employee", "");
        assert!(matches!(
            store.put("Employee", invalid).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(store.put(" ", employee()).await.is_err());
        assert!(store.list().await.unwrap().is_empty());

        store.put("Employee", employee()).await.unwrap();
        assert_eq!(store.get("Employee").await.unwrap(), Some(employee()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_updates_are_visible_on_next_read() {
        let store = LibSqlMappingStore::open_in_memory().await.unwrap();
        store.put("Employee", employee()).await.unwrap();

        let mut disabled = employee();
        disabled.enabled = false;
        store.put("Employee", disabled).await.unwrap();

        assert!(!store.get("Employee").await.unwrap().unwrap().enabled);
        assert!(store.delete("Employee").await.unwrap());
        assert!(store.get("Employee").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        let documents = json!({
            "Employee": employee(),
            "Task": {
                "frappe_doctype": "Task",
                "supabase_table": "tasks",
                "direction": "frappe_to_supabase",
                "field_mappings": {"subject": "task_name"}
            }
        });
        std::fs::write(&path, documents.to_string()).unwrap();

        let store = LibSqlMappingStore::open_in_memory().await.unwrap();
        assert_eq!(store.import_file(&path).await.unwrap(), 2);
        let (name, _) = store.find_by_table("tasks").await.unwrap().unwrap();
        assert_eq!(name, "Task");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_rejects_whole_file_on_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        let documents = json!({
            "Employee": employee(),
            "Broken": {"frappe_doctype": "Broken"}
        });
        std::fs::write(&path, documents.to_string()).unwrap();

        let store = LibSqlMappingStore::open_in_memory().await.unwrap();
        assert!(store.import_file(&path).await.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }
}
