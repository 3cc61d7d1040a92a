//! Driver trait abstraction over device backends
//!
//! A driver owns at most one live session with its device. The dispatcher only
//! talks to devices through this trait, so the robot arm and the serial
//! instruments share one routing table.

use crate::state_machine::Probe;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transfer failed during {phase}: {reason}")]
    Transfer { phase: &'static str, reason: String },

    #[error("RPC {method} failed: {reason}")]
    Rpc { method: String, reason: String },

    #[error("Device returned code {code} for {method}")]
    Status { method: String, code: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Where a session connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Serial port (e.g. "COM7" or "/dev/ttyUSB0")
    Serial { port: String, baud: u32 },
    /// Controller reachable over RPC with a separate streaming port
    Network {
        host: String,
        rpc_port: u16,
        stream_port: u16,
    },
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Serial { port, baud } => write!(f, "{}@{}", port, baud),
            ConnectTarget::Network {
                host,
                rpc_port,
                stream_port,
            } => write!(f, "{}:{} (stream {})", host, rpc_port, stream_port),
        }
    }
}

/// How much of a reply to read after sending
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Fire and forget
    #[default]
    None,
    /// Read up to exactly `n` bytes
    Exact(usize),
    /// Read until the buffer ends with `pattern`
    Until { pattern: Vec<u8>, max_bytes: usize },
}

/// Reply handling for [`Driver::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSpec {
    /// Discard buffered input before writing
    pub flush: bool,
    pub mode: ReadMode,
    /// Bound on each read from the device
    pub timeout: Duration,
}

impl Default for ReadSpec {
    fn default() -> Self {
        Self {
            flush: false,
            mode: ReadMode::None,
            timeout: Duration::from_millis(crate::timing::READ_TIMEOUT_MS),
        }
    }
}

/// What kind of resource an upload carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Lua program
    Lua,
    /// Teaching-point database
    PointTable,
}

/// Probes handed to the completion detector for a running program
pub type ProbeSet = Vec<Box<dyn Probe>>;

/// Uniform device capability.
///
/// Verbs a backend cannot perform keep the default body and report
/// [`DriverError::Unsupported`].
#[async_trait]
pub trait Driver: Send {
    /// Human-readable name for this driver
    fn name(&self) -> &'static str;

    /// Target of the live session, if any
    fn active_target(&self) -> Option<&ConnectTarget>;

    /// Open a session, closing any prior one first
    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), DriverError>;

    /// Release the session. A no-op when not connected.
    async fn disconnect(&mut self) -> Result<(), DriverError>;

    /// Write raw bytes and optionally collect a reply.
    ///
    /// A missing reply is `Ok(None)`, not an error.
    async fn send(
        &mut self,
        _bytes: &[u8],
        _read: &ReadSpec,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        Err(DriverError::Unsupported("send"))
    }

    /// Transfer a file to the device
    async fn upload(&mut self, _resource: &Path, _kind: UploadKind) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("upload"))
    }

    /// Upload a point-table database, through the dedicated calls unless `legacy`
    async fn upload_point_table(&mut self, _path: &Path, _legacy: bool) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("upload_point_table"))
    }

    /// Make an uploaded point-table database the active one
    async fn switch_point_table(&mut self, _name: &str) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("switch_point_table"))
    }

    /// Load a program stored on the device
    async fn load_program(&mut self, _file: &str) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("load_program"))
    }

    /// Start the loaded program and return the probes that observe it
    async fn run_program(&mut self) -> Result<ProbeSet, DriverError> {
        Err(DriverError::Unsupported("run_program"))
    }
}
