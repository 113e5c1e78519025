use std::path::Path;

use crate::commands::common::open_stores;
use crate::error::CliError;

pub async fn run_retry_failed(max_retries: u32, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let requeued = stores.queue.retry_failed_operations(max_retries).await?;
    println!("Requeued {requeued} failed operation(s)");
    Ok(())
}
