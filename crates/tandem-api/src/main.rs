mod config;
mod error;
mod routes;
mod webhook;
mod worker;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tandem_api=info".parse().expect("valid directive"))
                .add_directive("tandem_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting tandem-api with config: {:?}", config);

    let engine = Arc::new(config.service.open_engine().await?);
    engine.recover().await?;

    let worker = config.queue_poll_interval.map(|interval| {
        worker::spawn(
            engine.clone(),
            worker::WorkerSettings {
                interval,
                retry_max: config.queue_retry_max,
                failed_retention: config.failed_retention,
            },
        )
    });

    let router = app_router(AppState::from_config(engine, &config));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("tandem-api listening on {}", config.bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        worker.abort();
    }
    tracing::info!("tandem-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
