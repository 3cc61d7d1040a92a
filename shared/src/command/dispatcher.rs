//! Command dispatcher - validates commands and routes them to driver verbs

use super::handlers::{self, HandlerContext};
use super::{status, Command, Response};
use crate::codec;
use crate::config::{ConfigError, EnvFile};
use crate::driver::Driver;
use crate::queue::QueueHandler;
use crate::registry::ConnectionRegistry;
use crate::state_machine::CompletionDetector;
use crate::{now_ms, timing};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of handling one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command completed successfully
    Completed {
        message: String,
        received: Option<Vec<u8>>,
    },
    /// Command was valid but the device side failed
    Failed { message: String },
    /// Command rejected before reaching the device (missing field, bad path, ...)
    Rejected { message: String },
}

impl CommandResult {
    pub fn completed(message: &str) -> Self {
        Self::Completed {
            message: message.to_string(),
            received: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn failed() -> Self {
        Self::Failed {
            message: status::FAILED.to_string(),
        }
    }
}

/// Settings the handlers need besides the driver
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Base for relative `upload_lua` paths
    pub scripts_dir: PathBuf,
    /// Base for relative `upload_tech_point` paths
    pub database_dir: PathBuf,
    /// Per-read timeout for device replies
    pub read_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("lua_scripts"),
            database_dir: PathBuf::from("TechPoint_db"),
            read_timeout: Duration::from_millis(timing::READ_TIMEOUT_MS),
        }
    }
}

impl DispatcherConfig {
    /// Read `LUA_DIR`, `DB_DIR` and `DEFAULT_TIMEOUT`
    pub fn from_env(env: &EnvFile) -> Result<Self, ConfigError> {
        Ok(Self {
            scripts_dir: env.dir_or("LUA_DIR", "lua_scripts"),
            database_dir: env.dir_or("DB_DIR", "TechPoint_db"),
            read_timeout: env.seconds_or(
                "DEFAULT_TIMEOUT",
                Duration::from_millis(timing::READ_TIMEOUT_MS),
            )?,
        })
    }
}

/// Maps commands onto a driver. Owns the driver and with it the single session.
pub struct Dispatcher<D> {
    driver: D,
    registry: ConnectionRegistry,
    config: DispatcherConfig,
    detector: CompletionDetector,
}

impl<D: Driver> Dispatcher<D> {
    /// Create a new dispatcher
    pub fn new(
        driver: D,
        registry: ConnectionRegistry,
        config: DispatcherConfig,
        detector: CompletionDetector,
    ) -> Self {
        Self {
            driver,
            registry,
            config,
            detector,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Dispatch a command and build its response. Never fails.
    pub async fn dispatch(&mut self, command: &Command) -> Response {
        let start_time = now_ms();
        info!(
            "[DISPATCH] Executing command: id={:?} kind={:?} driver={}",
            command.id(),
            command.kind(),
            self.driver.name()
        );

        let mut ctx = HandlerContext {
            driver: &mut self.driver,
            registry: &self.registry,
            config: &self.config,
            detector: &self.detector,
        };

        let result = match command.kind() {
            "upload_lua" => handlers::handle_upload_lua(&mut ctx, command).await,
            "run_lua" => handlers::handle_run_lua(&mut ctx, command).await,
            "upload_tech_point" | "upload_techpoint" => {
                handlers::handle_upload_tech_point(&mut ctx, command).await
            }
            "connect" => handlers::handle_connect(&mut ctx, command).await,
            "send_hex" => handlers::handle_send_hex(&mut ctx, command).await,
            "disconnect" => handlers::handle_disconnect(&mut ctx, command).await,
            other => {
                warn!("[DISPATCH] Unknown command type: {:?}", other);
                CommandResult::rejected(status::FAILED)
            }
        };

        let processing_time = now_ms().saturating_sub(start_time);
        let id = command.id();

        match result {
            CommandResult::Completed { message, received } => {
                info!("[DISPATCH] Command completed: {} ({}ms)", message, processing_time);
                let received = received
                    .filter(|bytes| !bytes.is_empty())
                    .map(|bytes| codec::format_hex(&bytes));
                Response::success(id, message).with_received(received)
            }
            CommandResult::Failed { message } => {
                error!("[DISPATCH] Command failed: {} ({}ms)", message, processing_time);
                Response::failure(id, message)
            }
            CommandResult::Rejected { message } => {
                warn!("[DISPATCH] Command rejected: {}", message);
                Response::failure(id, message)
            }
        }
    }
}

#[async_trait]
impl<D: Driver> QueueHandler for Dispatcher<D> {
    async fn handle(&mut self, document: Value) -> Response {
        match Command::from_value(document) {
            Ok(command) => self.dispatch(&command).await,
            Err(e) => {
                warn!("[DISPATCH] {}", e);
                Response::invalid_json()
            }
        }
    }

    async fn shutdown(&mut self) {
        debug!("[DISPATCH] Releasing {} session", self.driver.name());
        if let Err(e) = self.driver.disconnect().await {
            error!("[DISPATCH] Failed to release session: {}", e);
        }
    }
}
