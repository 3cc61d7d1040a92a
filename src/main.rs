mod arm;
mod config;
mod rpc;

use anyhow::Result;
use arm::RobotArmDriver;
use clap::Parser;
use config::Settings;
use devq_shared::orchestrator::shutdown_signal;
use devq_shared::{Dispatcher, Driver, FileQueue, Orchestrator, ReadySignal};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Printed once the queue is being watched
const READY: &str = "ready";

/// Printed when the controller cannot be reached at startup
const CONNECT_FAILED: &str = "connect_failed";

#[derive(Parser, Debug)]
#[command(name = "arm-controller", about = "File-queue orchestrator for the robot arm")]
struct Cli {
    /// Key=value configuration file
    #[arg(long, default_value = ".env_arm_config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout is reserved for the sentinels
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Arm controller failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::load(&cli.config)?;

    info!("Arm controller starting (config {})", cli.config.display());
    info!("  Controller: {}", settings.arm.target());
    info!("  Registry: {} device(s)", settings.registry.len());

    let mut driver = RobotArmDriver::new(settings.arm.state_port, settings.arm.rpc_timeout);
    if let Err(e) = driver.connect(&settings.arm.target()).await {
        error!("[ARM] {}", e);
        ReadySignal::new(CONNECT_FAILED).emit();
        return Ok(ExitCode::FAILURE);
    }
    info!("  Backend: {}", driver.backend_name().unwrap_or("none"));

    let dispatcher = Dispatcher::new(
        driver,
        settings.registry,
        settings.dispatcher,
        settings.detector,
    );
    let queue = FileQueue::new(settings.queue, dispatcher);

    Orchestrator::new(queue, ReadySignal::new(READY))
        .run(shutdown_signal())
        .await?;

    Ok(ExitCode::SUCCESS)
}
