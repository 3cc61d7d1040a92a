//! Command dispatch infrastructure shared by all orchestrator instances
//!
//! This module handles:
//! - Parsing command documents read from the queue
//! - Validating the fields each command kind requires
//! - Routing commands to the driver verbs that implement them
//! - Producing exactly one response per command

mod dispatcher;
pub mod handlers;
mod model;

pub use dispatcher::{CommandResult, Dispatcher, DispatcherConfig};
pub use model::{Command, CommandError, Response};

/// Status tokens written in the `message` field
pub mod status {
    pub const UPLOADED: &str = "uploaded";
    pub const COMPLETED: &str = "completed";
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const SENT: &str = "sent";
    pub const FAILED: &str = "failed";
    pub const INVALID_JSON: &str = "invalid_json";
}
