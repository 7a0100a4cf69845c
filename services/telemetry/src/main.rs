use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_service::config::{AckPolicy, Config, LogFormat};
use telemetry_service::{
    start_api_server, AlertEvaluator, AppState, DisabledNotifier, HttpNotifier,
    IngestionPipeline, KafkaQueue, Notifier, PgDocumentStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.log_format);

    info!(
        service = %config.service.name,
        "Starting telemetry ingestion service"
    );
    config.log_summary();

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        PgDocumentStore::new(&config.database)
            .await
            .context("Failed to initialize document store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let queue = Arc::new(KafkaQueue::new(&config.kafka).context("Failed to initialize Kafka queue")?);

    if config.pipeline.ack_policy == AckPolicy::AckAfterPersist
        && config.kafka.dead_letter_topic.is_none()
    {
        warn!("No dead-letter topic configured; malformed readings will be redelivered indefinitely");
    }

    let notifier: Arc<dyn Notifier> = if config.notification.enabled {
        Arc::new(HttpNotifier::new(&config.notification).context("Failed to initialize notifier")?)
    } else {
        info!("Alert notifications disabled");
        Arc::new(DisabledNotifier)
    };

    let pipeline = IngestionPipeline::new(
        queue,
        store.clone(),
        notifier,
        AlertEvaluator::new(config.alerts.clone()),
        config.pipeline.clone(),
    );

    // Create API state
    let api_state = AppState {
        service_name: Arc::from(config.service.name.as_str()),
        pool: store.pool().clone(),
    };

    let shutdown = CancellationToken::new();

    // Spawn pipeline task
    let pipeline_shutdown = shutdown.clone();
    let pipeline_handle = tokio::spawn(async move {
        pipeline.run(pipeline_shutdown).await;
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Telemetry service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down telemetry service");

    // Let the in-flight message finish before stopping
    shutdown.cancel();
    if let Err(e) = pipeline_handle.await {
        error!(error = %e, "Pipeline task failed");
    }
    api_handle.abort();

    info!("Telemetry service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
