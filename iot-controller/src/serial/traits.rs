//! Port abstraction so the driver can run against real serial ports or test streams

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// An open port that can read and write bytes
#[async_trait]
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Drop input received but not yet read
    fn discard_input(&mut self) -> Result<()>;

    /// Close the port gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Factory for opening ports
#[async_trait]
pub trait PortConnector: Send + Sync {
    /// The stream type this connector produces
    type Stream: PortStream;

    /// Open `port` at `baud`
    async fn open(&self, port: &str, baud: u32) -> Result<Self::Stream>;

    /// Human-readable name for this connector
    fn name(&self) -> &'static str;
}
