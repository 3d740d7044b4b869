//! Prometheus exporter for Windows performance counters.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use perfsight_perflib::{Perflib, RawSnapshotReader};
use tokio::sync::watch;
use tracing::{error, info};

use perfsight_exporter::config::{PerflibConfig, PerflibSource};
use perfsight_exporter::{
    CollectorRegistry, DemoReader, ExporterConfig, HttpServer, Scraper, collectors,
};

/// Prometheus exporter for Windows performance counters.
#[derive(Parser, Debug)]
#[command(name = "perfsight-exporter")]
#[command(about = "Export Windows performance counters as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Comma-separated collectors to enable (overrides config).
    #[arg(long, value_delimiter = ',')]
    collectors: Option<Vec<String>>,

    /// Serve synthetic data instead of reading the system.
    #[arg(long)]
    demo: bool,

    /// Log level (trace, debug, info, warn, error), overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

fn open_reader(config: &PerflibConfig) -> anyhow::Result<Arc<dyn RawSnapshotReader>> {
    match config.source {
        PerflibSource::Demo => Ok(Arc::new(DemoReader::default())),
        #[cfg(windows)]
        PerflibSource::Registry => Ok(Arc::new(perfsight_perflib::RegistryReader::new(
            config.language.clone(),
        ))),
        #[cfg(not(windows))]
        PerflibSource::Registry => Err(perfsight_perflib::PerflibError::Unsupported(
            "registry performance data is only available on Windows, use --demo".to_string(),
        )
        .into()),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    if let Some(listen) = args.listen {
        config.web.listen = listen;
    }
    if let Some(enabled) = args.collectors {
        config.collectors.enabled = enabled;
    }
    if args.demo {
        config.perflib.source = PerflibSource::Demo;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    perfsight_common::init_tracing(&config.logging)?;

    info!(
        source = ?config.perflib.source,
        collectors = ?config.collectors.enabled,
        "Starting PerfSight exporter"
    );

    let perflib = Perflib::from_reader(open_reader(&config.perflib)?)?;
    info!(names = perflib.names().len(), "Loaded counter name table");

    let registry = Arc::new(CollectorRegistry::build(
        &config.collectors.enabled,
        collectors::create,
    )?);
    let scraper = Arc::new(Scraper::new(
        registry.clone(),
        perflib,
        &config.scrape,
        config.prometheus.prefix.clone(),
    ));

    let listen_addr: SocketAddr = config
        .web
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(scraper, listen_addr, config.web.path.clone());
    let mut http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    let http_finished = tokio::select! {
        _ = wait_for_signal() => false,
        _ = &mut http_task => {
            error!("HTTP server exited unexpectedly");
            true
        }
    };

    let _ = shutdown_tx.send(true);

    if !http_finished
        && tokio::time::timeout(Duration::from_secs(5), http_task)
            .await
            .is_err()
    {
        error!("HTTP server did not stop in time");
    }

    registry.close_all();
    info!("Exporter stopped");
    Ok(())
}
