use std::path::Path;

use crate::commands::common::{open_stores, parse_operation_id};
use crate::error::CliError;

pub async fn run_show(id: &str, db_path: &Path) -> Result<(), CliError> {
    let operation_id = parse_operation_id(id)?;
    let stores = open_stores(db_path).await?;
    let queued = stores
        .queue
        .get_operation(&operation_id)
        .await?
        .ok_or_else(|| CliError::OperationNotFound(operation_id.to_string()))?;

    println!("{}", serde_json::to_string_pretty(&queued)?);
    Ok(())
}
