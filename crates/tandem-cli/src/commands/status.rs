use std::path::Path;

use crate::commands::common::{format_status_lines, open_stores};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let status = stores.queue.status().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }

    Ok(())
}
