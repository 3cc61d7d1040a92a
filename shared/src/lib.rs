//! Device Queue Shared Contract
//!
//! This crate provides the pieces every orchestrator instance shares: the
//! command/response model, the file queue, the command dispatcher, the driver
//! capability trait and the completion detector that decides when a dispatched
//! device operation has finished.

pub mod codec;
pub mod command;
pub mod config;
pub mod driver;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use command::{Command, CommandError, Dispatcher, DispatcherConfig, Response};
pub use driver::{ConnectTarget, Driver, DriverError, ReadMode, ReadSpec, UploadKind};
pub use orchestrator::{Orchestrator, ReadySignal};
pub use queue::{FileQueue, QueueConfig, QueueHandler};
pub use registry::ConnectionRegistry;
pub use state_machine::{CompletionDetector, InFlightOperation, Probe, ProbeReading, Verdict};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters shared by all orchestrator instances
pub mod timing {
    /// Idle sleep between two scans of the input directory
    pub const QUEUE_POLL_INTERVAL_MS: u64 = 200;

    /// Sleep between two rounds of completion probes
    pub const PROBE_INTERVAL_MS: u64 = 100;

    /// Wall-clock budget for completion detection
    pub const COMPLETION_TIMEOUT_MS: u64 = 8000;

    /// Default per-read timeout for device replies
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// Upper bound for an until-pattern read
    pub const READ_UNTIL_MAX_BYTES: usize = 4096;
}

/// File naming used by the queue
pub mod naming {
    /// Extension of a command file
    pub const COMMAND_EXT: &str = ".json";

    /// Suffix of a response file (also excluded from scans)
    pub const RESPONSE_SUFFIX: &str = ".response.json";

    /// Suffix appended to a command file once it is claimed
    pub const CLAIM_SUFFIX: &str = ".claimed";

    /// Suffix of a response being written before publication
    pub const PARTIAL_SUFFIX: &str = ".partial";
}
