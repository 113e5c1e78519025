use std::path::Path;

use tandem_core::store::MappingStore;

use crate::commands::common::{format_mapping_lines, open_stores};
use crate::error::CliError;

pub async fn run_mappings_list(db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let mappings = stores.mappings.list().await?;
    for line in format_mapping_lines(&mappings) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_mappings_show(name: &str, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let mapping = stores
        .mappings
        .get(name)
        .await?
        .ok_or_else(|| CliError::MappingNotFound(name.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

pub async fn run_mappings_import(file: &Path, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let imported = stores.mappings.import_file(file).await?;
    println!("Imported {imported} mapping(s) from {}", file.display());
    Ok(())
}

pub async fn run_mappings_delete(name: &str, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    if !stores.mappings.delete(name).await? {
        return Err(CliError::MappingNotFound(name.to_string()));
    }
    println!("{name}");
    Ok(())
}
