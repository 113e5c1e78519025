//! Mapping document repository implementation

use crate::error::Result;
use crate::mapping::MappingConfig;
use crate::util::unix_timestamp_millis;
use libsql::{params, Connection};

/// Trait for mapping document storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MappingRepository {
    async fn get(&self, name: &str) -> Result<Option<MappingConfig>>;

    /// All documents, ordered by name
    async fn list(&self) -> Result<Vec<(String, MappingConfig)>>;

    /// Insert or replace a document
    async fn upsert(&self, name: &str, config: &MappingConfig) -> Result<()>;

    /// `false` when no document had that name
    async fn delete(&self, name: &str) -> Result<bool>;

    /// First document, by name, whose Supabase table is `table`
    async fn find_by_table(&self, table: &str) -> Result<Option<(String, MappingConfig)>>;
}

/// libSQL implementation of `MappingRepository`
pub struct LibSqlMappingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMappingRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MappingRepository for LibSqlMappingRepository<'_> {
    async fn get(&self, name: &str) -> Result<Option<MappingConfig>> {
        let mut rows = self
            .conn
            .query("SELECT document FROM sync_mappings WHERE name = ?1", [name])
            .await?;

        if let Some(row) = rows.next().await? {
            let document: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&document)?))
        } else {
            Ok(None)
        }
    }

    async fn list(&self) -> Result<Vec<(String, MappingConfig)>> {
        let mut rows = self
            .conn
            .query("SELECT name, document FROM sync_mappings ORDER BY name", ())
            .await?;

        let mut mappings = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            let document: String = row.get(1)?;
            mappings.push((name, serde_json::from_str(&document)?));
        }
        Ok(mappings)
    }

    async fn upsert(&self, name: &str, config: &MappingConfig) -> Result<()> {
        let document = serde_json::to_string(config)?;
        self.conn
            .execute(
                "INSERT INTO sync_mappings (name, frappe_doctype, supabase_table, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     frappe_doctype = excluded.frappe_doctype,
                     supabase_table = excluded.supabase_table,
                     document = excluded.document,
                     updated_at = excluded.updated_at",
                params![
                    name,
                    config.frappe_doctype.as_str(),
                    config.supabase_table.as_str(),
                    document,
                    unix_timestamp_millis()
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sync_mappings WHERE name = ?1", [name])
            .await?;
        Ok(affected > 0)
    }

    async fn find_by_table(&self, table: &str) -> Result<Option<(String, MappingConfig)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, document FROM sync_mappings
                 WHERE supabase_table = ?1
                 ORDER BY name
                 LIMIT 1",
                [table],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            let document: String = row.get(1)?;
            Ok(Some((name, serde_json::from_str(&document)?)))
        } else {
            Ok(None)
        }
    }
}
