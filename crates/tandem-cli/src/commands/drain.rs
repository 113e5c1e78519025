use std::path::Path;

use tandem_core::config::ServiceConfig;

use crate::error::CliError;

/// Process pending operations against the live systems named in the
/// environment, using the database at `db_path`.
pub async fn run_drain(limit: usize, db_path: &Path) -> Result<(), CliError> {
    let mut config = ServiceConfig::from_env()?;
    config.db_path = db_path.to_path_buf();

    tracing::info!(limit, db_path = %db_path.display(), "Draining pending operations");
    let engine = config.open_engine().await?;
    let recovered = engine.recover().await?;
    if recovered > 0 {
        println!("Recovered {recovered} interrupted operation(s)");
    }

    let summary = engine.process_queued(limit).await?;
    println!(
        "Processed {}: {} succeeded, {} failed",
        summary.processed, summary.succeeded, summary.failed
    );
    Ok(())
}
