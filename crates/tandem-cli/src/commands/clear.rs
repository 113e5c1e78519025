use std::path::Path;

use crate::commands::common::open_stores;
use crate::error::CliError;

pub async fn run_clear(confirmed: bool, db_path: &Path) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }

    let stores = open_stores(db_path).await?;
    let cleared = stores.queue.clear().await?;
    println!("Cleared {cleared} operation(s)");
    Ok(())
}
