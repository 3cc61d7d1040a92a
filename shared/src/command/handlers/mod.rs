//! Command handlers for the different command kinds

mod point_table;
mod program;
mod send;
mod session;

pub use point_table::handle_upload_tech_point;
pub use program::{handle_run_lua, handle_upload_lua};
pub use send::handle_send_hex;
pub use session::{handle_connect, handle_disconnect};

use super::dispatcher::{CommandResult, DispatcherConfig};
use super::Command;
use crate::driver::{ConnectTarget, Driver, DriverError};
use crate::registry::ConnectionRegistry;
use crate::state_machine::CompletionDetector;
use std::path::{Path, PathBuf};
use tracing::error;

/// Context passed to command handlers
pub struct HandlerContext<'a> {
    pub driver: &'a mut dyn Driver,
    pub registry: &'a ConnectionRegistry,
    pub config: &'a DispatcherConfig,
    pub detector: &'a CompletionDetector,
}

/// Log a driver error and turn it into the generic failure
fn driver_failure(verb: &str, e: DriverError) -> CommandResult {
    error!("  [{}] {}", verb, e);
    CommandResult::failed()
}

/// Resolve a command path against a base directory
fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Resolve the connection target named by `port`/`baud` or `device`.
///
/// `Ok(None)` means the command names no target at all.
fn resolve_target(
    registry: &ConnectionRegistry,
    command: &Command,
) -> Result<Option<ConnectTarget>, CommandResult> {
    let baud = command.uint_field("baud").and_then(|b| u32::try_from(b).ok());

    if let Some(port) = command.text_field("port") {
        return Ok(Some(ConnectTarget::Serial {
            port,
            baud: baud.unwrap_or(registry.default_baud()),
        }));
    }

    let Some(device) = command.text_field("device") else {
        return Ok(None);
    };

    match registry.resolve(&device) {
        Some(ConnectTarget::Serial { port, baud: registered }) => Ok(Some(ConnectTarget::Serial {
            port: port.clone(),
            baud: baud.unwrap_or(*registered),
        })),
        Some(network) => Ok(Some(network.clone())),
        None => Err(CommandResult::rejected(format!("Unknown device: {}", device))),
    }
}
