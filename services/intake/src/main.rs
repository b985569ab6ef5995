use anyhow::{Context, Result};
use payment_intake::config::StorageBackend;
use payment_intake::{
    start_api_server, AppState, BufferStrategy, CloudinaryStore, Config, EventCalendar,
    MediaStore, PaymentArchive, S3Store, UploadPolicy,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        backend = ?config.storage.backend,
        "Starting payment intake service"
    );

    init_metrics(config.service.metrics_port)?;

    let missing = config.missing_storage_credentials();
    if !missing.is_empty() {
        warn!(
            missing = %missing.join(", "),
            "Storage credentials missing, uploads will fail until they are set"
        );
    }

    let calendar = EventCalendar::new(config.event.dates()?);
    for (index, date) in (1..).zip(calendar.days()) {
        match date {
            Some(date) => info!(day = index, date = %date, "Festival day configured"),
            None => warn!(day = index, "Festival day not configured"),
        }
    }

    let store: Arc<dyn MediaStore> = match config.storage.backend {
        StorageBackend::Cloudinary => Arc::new(
            CloudinaryStore::new(&config.storage.cloudinary)
                .context("Failed to initialize Cloudinary client")?,
        ),
        StorageBackend::S3 => Arc::new(
            S3Store::new(&config.storage.s3)
                .await
                .context("Failed to initialize S3 store")?,
        ),
    };
    let archive = PaymentArchive::new(store, config.storage.root_folder.clone());

    // Reported but never fatal
    archive.verify_connection().await;

    let buffering = BufferStrategy::from_config(&config);
    buffering
        .prepare()
        .await
        .context("Failed to create upload buffer directory")?;

    let api_state = AppState {
        archive,
        calendar,
        policy: UploadPolicy::from_config(&config.upload),
        buffering,
        service_name: config.service.name.clone(),
    };

    let server_config = config.server.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &server_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!(
        port = config.server.port,
        production = config.upload.production,
        "Payment intake service started successfully"
    );

    shutdown_signal().await;

    info!("Shutting down payment intake service");
    api_handle.abort();
    info!("Payment intake service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
