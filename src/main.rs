use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_command::{
    alerts::LogAlertSink,
    config::Config,
    discovery::{MdnsBrowser, Reconciler},
    registry::CameraRegistry,
    security,
    stream::RtspSource,
    supervisor::FleetSupervisor,
    telemetry::TelemetryBridge,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/fleet-command/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting Fleet Command v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {:?}", args.config);

    // Load configuration
    let config = Config::load_or_default(&args.config).await?;
    info!("Configuration loaded successfully");
    info!("App name: {}", config.app.name);

    // Resolve credentials once; the fleet uses them for every camera
    let stream_creds = security::stream_credentials(&config.security);
    let broker_creds = security::broker_credentials(&config.security);

    // Shared registry and the supervisor owning the stream actors
    let registry = Arc::new(CameraRegistry::new());
    let source = Arc::new(RtspSource::new(Some(stream_creds)));
    let supervisor = Arc::new(FleetSupervisor::new(&config, registry.clone(), source));
    info!("Fleet supervisor initialized");

    // Telemetry bridge to the broker
    let alerts = Arc::new(LogAlertSink);
    let (bridge, eventloop) =
        TelemetryBridge::new(&config.mqtt, &broker_creds, registry.clone(), alerts)?;
    let bridge = Arc::new(bridge);
    {
        let bridge = bridge.clone();
        let shutdown = supervisor.shutdown_signal();
        tokio::spawn(async move {
            bridge.run(eventloop, shutdown).await;
        });
    }
    info!(
        "Telemetry bridge started against {}:{}",
        config.mqtt.broker, config.mqtt.port
    );

    // Service discovery drives registry state and actor lifecycle
    let browser = MdnsBrowser::new(&config.discovery.service_type);
    let reconciler = Reconciler::new(supervisor.clone());
    {
        let shutdown = supervisor.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = browser.run(reconciler, shutdown).await {
                error!("Discovery error: {}", e);
            }
        });
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    let grace = std::time::Duration::from_secs(config.app.shutdown_timeout_seconds);
    if tokio::time::timeout(grace, supervisor.shutdown()).await.is_err() {
        error!("Graceful shutdown timed out after {:?}", grace);
    }
    info!("Fleet Command stopped");

    Ok(())
}
