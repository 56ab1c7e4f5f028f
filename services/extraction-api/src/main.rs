use anyhow::{Context, Result};
use extraction_api::config::ServiceConfig;
use extraction_api::{start_api_server, AppState, Config, ExtractionStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        "Starting extraction API"
    );

    if config.service.metrics_enabled {
        init_metrics(&config.service)?;
    }

    let store = ExtractionStore::new(&config.database);

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    start_api_server(AppState::new(store), &config.api, shutdown_signal()).await?;

    info!("Extraction API stopped");

    Ok(())
}

/// JSON logs; `RUST_LOG` wins over the configured level
fn init_tracing(service: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

/// Prometheus scrape endpoint, every series labelled with the service name
fn init_metrics(service: &ServiceConfig) -> Result<()> {
    let listen = SocketAddr::from(([0, 0, 0, 0], service.metrics_port));

    PrometheusBuilder::new()
        .add_global_label("service", &service.name)
        .with_http_listener(listen)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(address = %listen, "Serving Prometheus metrics");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
