//! Session handlers (connect, disconnect)

use super::{driver_failure, resolve_target, HandlerContext};
use crate::command::{status, Command, CommandResult};
use tracing::info;

/// Handle CONNECT command
pub async fn handle_connect(ctx: &mut HandlerContext<'_>, command: &Command) -> CommandResult {
    let target = match resolve_target(ctx.registry, command) {
        Ok(Some(target)) => target,
        Ok(None) => return CommandResult::rejected("Missing port/device"),
        Err(rejected) => return rejected,
    };

    info!("  [CONNECT] {}", target);

    match ctx.driver.connect(&target).await {
        Ok(()) => CommandResult::completed(status::CONNECTED),
        Err(e) => driver_failure("CONNECT", e),
    }
}

/// Handle DISCONNECT command
pub async fn handle_disconnect(ctx: &mut HandlerContext<'_>, _command: &Command) -> CommandResult {
    info!("  [DISCONNECT] {}", ctx.driver.name());

    match ctx.driver.disconnect().await {
        Ok(()) => CommandResult::completed(status::DISCONNECTED),
        Err(e) => driver_failure("DISCONNECT", e),
    }
}
