use metering_service::config::MeteringConfig;
use metering_service::services::init_metrics;
use metering_service::startup::Application;
use metering_service::workers::AggregationWorker;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Must run before any metric is recorded
    init_metrics();

    let config = MeteringConfig::from_env().map_err(|e| {
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let app = Application::build(config.clone()).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    let state = app.state().clone();
    let worker = AggregationWorker::new(
        config.aggregation.clone(),
        state.aggregator.clone(),
        state.alerts.clone(),
    );
    let worker_shutdown = worker.shutdown_token();
    let worker_handle = tokio::spawn(worker.start());

    tracing::info!(port = app.port(), "metering-service started");

    let result = app.run_until_stopped().await;

    worker_shutdown.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!("Aggregation worker panicked: {}", e);
    }

    result
}
