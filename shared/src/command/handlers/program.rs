//! Lua program handlers (upload, run)

use super::{driver_failure, resolve_path, HandlerContext};
use crate::command::{status, Command, CommandResult};
use crate::driver::UploadKind;
use crate::state_machine::Verdict;
use tracing::{info, warn};

/// Handle UPLOAD_LUA command
pub async fn handle_upload_lua(ctx: &mut HandlerContext<'_>, command: &Command) -> CommandResult {
    let Some(path) = command.str_field("path") else {
        return CommandResult::rejected("Missing path");
    };

    let resolved = resolve_path(&ctx.config.scripts_dir, path);
    if !resolved.is_file() {
        return CommandResult::rejected("Invalid path");
    }

    info!("  [UPLOAD_LUA] {}", resolved.display());

    match ctx.driver.upload(&resolved, UploadKind::Lua).await {
        Ok(()) => CommandResult::completed(status::UPLOADED),
        Err(e) => driver_failure("UPLOAD_LUA", e),
    }
}

/// Handle RUN_LUA command: load, run, then wait for the device to finish
pub async fn handle_run_lua(ctx: &mut HandlerContext<'_>, command: &Command) -> CommandResult {
    let Some(file) = command.str_field("file") else {
        return CommandResult::rejected("Missing file");
    };

    info!("  [RUN_LUA] {}", file);

    if let Err(e) = ctx.driver.load_program(file).await {
        return driver_failure("RUN_LUA", e);
    }
    let probes = match ctx.driver.run_program().await {
        Ok(probes) => probes,
        Err(e) => return driver_failure("RUN_LUA", e),
    };

    let op = ctx.detector.begin(probes);
    match ctx.detector.await_completion(op).await {
        Verdict::Done { timed_out } => {
            if timed_out {
                warn!("  [RUN_LUA] {} assumed complete after timeout", file);
            }
            CommandResult::completed(status::COMPLETED)
        }
        Verdict::Failed { reason } => {
            warn!("  [RUN_LUA] {} reported fault: {}", file, reason);
            CommandResult::failed()
        }
    }
}
