mod config;
mod errors;
mod handlers;
mod models;
mod services;
mod state;
mod worker;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use std::sync::Arc;
use tokio::time::Duration;
use crate::{
    config::Config,
    services::{ChatClient, RemoteTranslator, RemoteVisionAnalyzer, SpreadsheetExporter, TaskRegistry},
    state::AppState,
    worker::{BatchQueue, Orchestrator},
};
use tracing_subscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize basic tracing subscriber
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    if config.provider.api_key.is_empty() {
        tracing::warn!("No provider API key configured, every model call will be rejected");
    }

    for dir in [&config.upload.upload_dir, &config.upload.results_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir))?;
    }

    // Model clients share one HTTP connection pool
    let client = ChatClient::new(&config.provider)?;
    let analyzer = Arc::new(RemoteVisionAnalyzer::new(client.clone(), config.analysis.clone()));
    let translator = Arc::new(RemoteTranslator::new(client, config.translation.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        analyzer,
        translator,
        SpreadsheetExporter::new(&config.upload.results_dir),
        config.translation.failure_placeholder.clone(),
    ));

    let registry = Arc::new(TaskRegistry::new(&config.registry));
    let (queue, receiver) = BatchQueue::channel(config.worker.queue_capacity);

    // Initialize worker pool
    for worker_id in 0..config.worker.worker_count.max(1) {
        tokio::spawn(worker::worker_process(
            worker_id,
            receiver.clone(),
            registry.clone(),
            orchestrator.clone(),
        ));
    }
    tokio::spawn(worker::registry_sweeper(
        registry.clone(),
        Duration::from_secs(config.registry.sweep_interval_secs.max(1)),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = handlers::router(AppState {
        registry,
        queue,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app.into_make_service())
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
