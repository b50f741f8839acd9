use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::runtime::Builder;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

use binge::bridge::Bridge;
use binge::catalog::Catalog;
use binge::config::{BridgeConfig, SimulatorConfig};
use binge::control::Control;
use binge::generator::pool::Pool;
use binge::signals::Shutdown;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] binge::config::Error),
    #[error("Bridge returned an error: {0}")]
    Bridge(#[from] binge::bridge::Error),
    #[error("Control surface returned an error: {0}")]
    Control(#[from] binge::control::Error),
    #[error("Failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the traffic simulator and its HTTP control surface.
    Simulate,
    /// Run the WebSocket-to-Kafka ingestion bridge.
    Bridge,
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting binge {version} run.");

    let cli = Cli::parse();

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;

    let res = match cli.command {
        Commands::Simulate => {
            let config = SimulatorConfig::from_env()?;
            runtime.block_on(simulate(config))
        }
        Commands::Bridge => {
            let config = BridgeConfig::from_env()?;
            runtime.block_on(bridge(config))
        }
    };
    info!("Bye. :)");
    res
}

fn install_prometheus(addr: Option<SocketAddr>) -> Result<(), Error> {
    if let Some(addr) = addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "prometheus exporter installed");
    }
    Ok(())
}

/// Run the traffic simulator until interrupted, then drain all workers
/// before exiting.
async fn simulate(config: SimulatorConfig) -> Result<(), Error> {
    install_prometheus(config.prometheus_addr)?;

    let catalog = Arc::new(Catalog::load(&config.catalog_path));
    let pool = Arc::new(Pool::new(config.pool, catalog));
    let shutdown = Shutdown::new();

    let control = Control::new(config.control, Arc::clone(&pool), shutdown.clone());
    let server = tokio::spawn(control.run());

    signal::ctrl_c().await?;
    info!("received interrupt, draining workers");
    pool.stop().await;
    let _ = shutdown.signal();
    server.await??;
    Ok(())
}

/// Run the ingestion bridge until interrupted, then drain open connections
/// before exiting.
async fn bridge(config: BridgeConfig) -> Result<(), Error> {
    install_prometheus(config.prometheus_addr)?;

    let shutdown = Shutdown::new();
    let server = tokio::spawn(Bridge::new(config.bridge, shutdown.clone()).run());

    signal::ctrl_c().await?;
    info!("received interrupt, draining connections");
    let _ = shutdown.signal();
    server.await??;
    Ok(())
}
