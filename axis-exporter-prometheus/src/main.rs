//! Prometheus exporter for Axis network cameras.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use axis_exporter_prometheus::{
    AppState, AxisClient, ExporterConfig, HttpServer, MetricCollector,
};

/// Prometheus exporter for Axis network cameras.
#[derive(Parser, Debug)]
#[command(name = "axis-exporter-prometheus")]
#[command(about = "Export Axis camera temperature and heater status as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Scrape endpoint path (overrides config).
    #[arg(long)]
    path: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?
    } else {
        ExporterConfig::default()
    };

    // Override from CLI
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(path) = args.path {
        config.http.path = path;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // Environment credentials win over the config file
    let config = config.with_env_credentials();

    axis_common::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting Axis Prometheus Exporter");
    info!(
        username_configured = config.credentials.username.is_some(),
        password_configured = config.credentials.password.is_some(),
        timeout_secs = config.device.timeout_secs,
        "Device settings"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Arc::new(MetricCollector::new());
    let client = AxisClient::new(&config.device)?;

    // Parse listen address
    let listen_addr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let state = AppState::new(
        collector.clone(),
        client,
        config.credentials.clone(),
        &config.http.path,
    );
    let http_server = HttpServer::new(state, listen_addr);

    // Start HTTP server
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    // Print final stats
    let stats = collector.stats();
    info!(
        scrapes_served = stats.scrapes_served,
        scrapes_failed = stats.scrapes_failed,
        requests_rejected = stats.requests_rejected,
        series_count = collector.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
