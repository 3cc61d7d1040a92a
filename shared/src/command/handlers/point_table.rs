//! Teaching-point database handler

use super::{driver_failure, resolve_path, HandlerContext};
use crate::command::{status, Command, CommandResult};
use tracing::info;

/// Handle UPLOAD_TECH_POINT command
pub async fn handle_upload_tech_point(
    ctx: &mut HandlerContext<'_>,
    command: &Command,
) -> CommandResult {
    let Some(path) = command.str_field("path") else {
        return CommandResult::rejected("Missing path");
    };
    let activate = command.flag("activate", true);
    let legacy = command.flag("use_old", false);

    let resolved = resolve_path(&ctx.config.database_dir, path);
    if !resolved.is_file() {
        return CommandResult::rejected("Invalid path");
    }

    info!(
        "  [UPLOAD_TECH_POINT] {} activate={} legacy={}",
        resolved.display(),
        activate,
        legacy
    );

    if let Err(e) = ctx.driver.upload_point_table(&resolved, legacy).await {
        return driver_failure("UPLOAD_TECH_POINT", e);
    }

    if activate {
        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Err(e) = ctx.driver.switch_point_table(&name).await {
            return driver_failure("UPLOAD_TECH_POINT", e);
        }
    }

    CommandResult::completed(status::UPLOADED)
}
