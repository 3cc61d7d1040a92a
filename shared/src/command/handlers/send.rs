//! Raw frame handler

use super::{driver_failure, resolve_target, HandlerContext};
use crate::codec;
use crate::command::{status, Command, CommandResult};
use crate::driver::{ReadMode, ReadSpec};
use crate::timing;
use tracing::{debug, info, warn};

/// Handle SEND_HEX command
pub async fn handle_send_hex(ctx: &mut HandlerContext<'_>, command: &Command) -> CommandResult {
    let Some(hex) = command.str_field("hex").or_else(|| command.str_field("data")) else {
        return CommandResult::rejected("Missing hex");
    };
    let Ok(bytes) = codec::parse_hex(hex) else {
        return CommandResult::rejected("Invalid hex");
    };

    let mode = match command.uint_field("read_len").filter(|n| *n > 0) {
        Some(n) => ReadMode::Exact(n as usize),
        None => match command.str_field("read_until") {
            Some(pattern) => match codec::parse_hex(pattern) {
                Ok(pattern) => ReadMode::Until {
                    pattern,
                    max_bytes: command
                        .uint_field("max_bytes")
                        .map(|n| n as usize)
                        .unwrap_or(timing::READ_UNTIL_MAX_BYTES),
                },
                Err(e) => {
                    warn!("  [SEND_HEX] Not reading a reply, bad read_until {:?}: {}", pattern, e);
                    ReadMode::None
                }
            },
            None => ReadMode::None,
        },
    };

    let read = ReadSpec {
        flush: command.flag("flush", false),
        mode,
        timeout: ctx.config.read_timeout,
    };

    // A named target binds the session first, unless it already is.
    match resolve_target(ctx.registry, command) {
        Ok(Some(target)) if ctx.driver.active_target() != Some(&target) => {
            debug!("  [SEND_HEX] Auto-connecting to {}", target);
            if let Err(e) = ctx.driver.connect(&target).await {
                return driver_failure("SEND_HEX", e);
            }
        }
        Ok(_) => {}
        Err(rejected) => return rejected,
    }

    info!("  [SEND_HEX] {} byte(s), read {:?}", bytes.len(), read.mode);

    match ctx.driver.send(&bytes, &read).await {
        Ok(received) => CommandResult::Completed {
            message: status::SENT.to_string(),
            received,
        },
        Err(e) => driver_failure("SEND_HEX", e),
    }
}
