use std::path::Path;

use crate::commands::common::{
    failed_to_list_item, format_failed_lines, open_stores, FailedListItem,
};
use crate::error::CliError;

pub async fn run_failed(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let stores = open_stores(db_path).await?;
    let operations = stores.queue.failed_operations(Some(limit)).await?;

    if as_json {
        let items = operations
            .iter()
            .map(failed_to_list_item)
            .collect::<Vec<FailedListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_failed_lines(&operations) {
            println!("{line}");
        }
    }

    Ok(())
}
