use std::path::Path;
use std::time::Duration;

use crate::commands::common::open_stores;
use crate::error::CliError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub async fn run_cleanup(days: u32, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let older_than = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
    let removed = stores.queue.cleanup_failed(older_than).await?;
    println!("Removed {removed} failed operation(s) older than {days} day(s)");
    Ok(())
}
