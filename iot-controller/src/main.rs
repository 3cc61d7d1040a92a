mod config;
mod serial;

use anyhow::Result;
use clap::Parser;
use config::Settings;
use devq_shared::orchestrator::shutdown_signal;
use devq_shared::{Dispatcher, FileQueue, Orchestrator, ReadySignal};
use serial::{SerialDeviceDriver, TokioSerialConnector};
use std::path::{Path, PathBuf};

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Printed once the queue is being watched
const READY: &str = "iot_ready";

#[derive(Parser, Debug)]
#[command(name = "iot-controller", about = "File-queue orchestrator for serial instruments")]
struct Cli {
    /// Key=value configuration file (defaults to .env_iot_config, then config.env)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is reserved for the ready sentinel
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config, Path::new("."));

    if let Err(e) = run(&config_path).await {
        error!("IoT controller failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config_path: &Path) -> Result<()> {
    let settings = Settings::load(config_path)?;

    info!("IoT controller starting (config {})", config_path.display());
    info!("  Inbox: {}", settings.queue.input_dir.display());
    info!("  Outbox: {}", settings.queue.output_dir.display());
    for name in settings.registry.names() {
        if let Some(target) = settings.registry.resolve(name) {
            info!("  Device {} -> {}", name, target);
        }
    }

    // Ports are opened on demand by connect commands
    let driver = SerialDeviceDriver::new(TokioSerialConnector);
    let dispatcher = Dispatcher::new(
        driver,
        settings.registry,
        settings.dispatcher,
        settings.detector,
    );
    let queue = FileQueue::new(settings.queue, dispatcher);

    Orchestrator::new(queue, ReadySignal::new(READY))
        .run(shutdown_signal())
        .await
}
