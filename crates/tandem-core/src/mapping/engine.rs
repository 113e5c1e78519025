//! Field mapper: converts a record between the two systems' shapes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::complex::{ComplexMapping, LookupMiss};
use super::config::MappingConfig;
use super::transform::{apply_renames, apply_system_transforms, strip_internal_fields};
use crate::client::RecordStore;
use crate::error::Result;
use crate::models::{Direction, Record, System};
use crate::util::scalar_text;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LookupKey {
    direction: Direction,
    value: String,
    table: String,
}

/// Executes mapping documents.
///
/// Apart from lookups, which query the target system and cache hits, every
/// step is a pure function of the input record and the mapping.
pub struct MappingEngine {
    frappe: Arc<dyn RecordStore>,
    supabase: Arc<dyn RecordStore>,
    lookup_cache: Mutex<HashMap<LookupKey, Value>>,
}

impl MappingEngine {
    pub fn new(frappe: Arc<dyn RecordStore>, supabase: Arc<dyn RecordStore>) -> Self {
        Self {
            frappe,
            supabase,
            lookup_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Client for `system`
    pub fn store(&self, system: System) -> &Arc<dyn RecordStore> {
        match system {
            System::Frappe => &self.frappe,
            System::Supabase => &self.supabase,
        }
    }

    /// Map `data` from `source`'s shape to `target`'s.
    ///
    /// `None` maps to `None`. The caller's record is never modified.
    /// Only fields named by a rename or produced by a complex rule reach
    /// the output.
    pub async fn map_fields(
        &self,
        data: Option<&Record>,
        source: System,
        target: System,
        config: &MappingConfig,
    ) -> Result<Option<Record>> {
        let direction = Direction::from_systems(source, target)?;
        let Some(data) = data else {
            return Ok(None);
        };

        let mut working = data.clone();
        if source == System::Frappe {
            strip_internal_fields(&mut working);
        }

        let mut complex_outputs: Vec<String> = Vec::new();
        for (field, rule) in config.complex_rules(direction) {
            let field = field.as_str();
            let written = match rule {
                ComplexMapping::Lookup {
                    table,
                    match_field,
                    result_field,
                    on_miss,
                } => {
                    self.apply_lookup(
                        field,
                        &mut working,
                        direction,
                        LookupSpec {
                            table,
                            match_field,
                            result_field,
                            on_miss: *on_miss,
                        },
                    )
                    .await
                }
                local => local.apply_local(field, &mut working, direction),
            };

            match written {
                Ok(fields) => {
                    for written_field in fields {
                        if !complex_outputs.contains(&written_field) {
                            complex_outputs.push(written_field);
                        }
                    }
                }
                Err(reason) => {
                    tracing::warn!(
                        field,
                        rule = rule.kind(),
                        %direction,
                        %reason,
                        "Complex mapping failed, keeping original value"
                    );
                }
            }
        }

        let mapped = apply_renames(
            &working,
            config.renames(direction),
            &complex_outputs,
            target,
        );
        let mapped = apply_system_transforms(mapped, target);

        tracing::debug!(
            %direction,
            record_type = %config.frappe_doctype,
            input_fields = data.len(),
            mapped_fields = mapped.len(),
            "Field mapping completed"
        );
        Ok(Some(mapped))
    }

    async fn apply_lookup(
        &self,
        field: &str,
        data: &mut Record,
        direction: Direction,
        spec: LookupSpec<'_>,
    ) -> std::result::Result<Vec<String>, String> {
        let Some(value) = data.get(field).and_then(scalar_text) else {
            return Ok(Vec::new());
        };
        let key = LookupKey {
            direction,
            value: value.clone(),
            table: spec.table.to_string(),
        };

        if let Some(cached) = self.lookup_cache.lock().await.get(&key).cloned() {
            data.insert(field.to_string(), cached);
            return Ok(vec![field.to_string()]);
        }

        let found = self
            .store(direction.target())
            .find_by_field(spec.table, spec.match_field, &value)
            .await
            .map_err(|error| format!("lookup in {} failed: {error}", spec.table))?;

        let resolved = found.and_then(|record| record.get(spec.result_field).cloned());
        match resolved {
            Some(result) => {
                self.lookup_cache.lock().await.insert(key, result.clone());
                data.insert(field.to_string(), result);
            }
            None => {
                tracing::warn!(
                    field,
                    table = spec.table,
                    value = %value,
                    "Lookup found no match"
                );
                if spec.on_miss == LookupMiss::Drop {
                    data.insert(field.to_string(), Value::Null);
                }
            }
        }
        Ok(vec![field.to_string()])
    }

    pub async fn clear_cache(&self) {
        self.lookup_cache.lock().await.clear();
        tracing::info!("Lookup cache cleared");
    }

    pub async fn cache_size(&self) -> usize {
        self.lookup_cache.lock().await.len()
    }
}

struct LookupSpec<'a> {
    table: &'a str,
    match_field: &'a str,
    result_field: &'a str,
    on_miss: LookupMiss,
}
