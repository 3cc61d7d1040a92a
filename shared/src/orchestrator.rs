//! Orchestrator - ties the file queue to a dispatcher and announces readiness

use crate::queue::{FileQueue, QueueHandler};
use anyhow::{Context, Result};
use std::future::Future;
use std::io::Write;
use tracing::{error, info};

/// Token printed on stdout once the instance accepts commands
#[derive(Debug, Clone)]
pub struct ReadySignal {
    token: String,
}

impl ReadySignal {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Print the token as its own stdout line. Emitted at most once.
    pub fn emit(self) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", self.token).and_then(|_| stdout.flush()) {
            error!("Failed to emit readiness signal: {}", e);
        }
    }
}

/// One instance: a queue feeding a handler until shutdown
pub struct Orchestrator<H> {
    queue: FileQueue<H>,
    ready: ReadySignal,
}

impl<H: QueueHandler> Orchestrator<H> {
    pub fn new(queue: FileQueue<H>, ready: ReadySignal) -> Self {
        Self { queue, ready }
    }

    /// Prepare the directories, signal readiness, then serve until `shutdown`
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.queue.prepare().await.with_context(|| {
            format!(
                "Failed to create queue directories {} / {}",
                self.queue.config().input_dir.display(),
                self.queue.config().output_dir.display()
            )
        })?;

        info!(
            "Watching {} -> {} every {:?}",
            self.queue.config().input_dir.display(),
            self.queue.config().output_dir.display(),
            self.queue.config().poll_interval
        );

        self.ready.emit();
        self.queue.run_until(shutdown).await;

        info!("Orchestrator stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down...");
}
