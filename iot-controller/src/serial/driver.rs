//! Serial instrument driver

use super::traits::{PortConnector, PortStream};
use async_trait::async_trait;
use devq_shared::{codec, ConnectTarget, Driver, DriverError, ReadMode, ReadSpec};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Largest single read from the port
const READ_CHUNK: usize = 256;

struct Session<S> {
    target: ConnectTarget,
    stream: S,
}

/// Drives one serial port at a time
pub struct SerialDeviceDriver<C: PortConnector> {
    connector: C,
    session: Option<Session<C::Stream>>,
}

impl<C: PortConnector> SerialDeviceDriver<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            session: None,
        }
    }
}

/// Read one chunk, `None` once the per-read timeout passes
async fn read_chunk<S: PortStream>(
    stream: &mut S,
    chunk: &mut [u8],
    limit: Duration,
) -> Result<Option<usize>, DriverError> {
    match timeout(limit, stream.read(chunk)).await {
        Ok(Ok(0)) | Err(_) => Ok(None),
        Ok(Ok(n)) => Ok(Some(n)),
        Ok(Err(e)) => Err(DriverError::Io(e)),
    }
}

async fn read_exact_or_timeout<S: PortStream>(
    stream: &mut S,
    len: usize,
    limit: Duration,
) -> Result<Vec<u8>, DriverError> {
    // `len` comes straight from the command file, so grow only as bytes arrive
    let mut received = Vec::with_capacity(len.min(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];
    while received.len() < len {
        let want = (len - received.len()).min(READ_CHUNK);
        match read_chunk(stream, &mut chunk[..want], limit).await? {
            Some(n) => received.extend_from_slice(&chunk[..n]),
            None => break,
        }
    }
    Ok(received)
}

async fn read_until<S: PortStream>(
    stream: &mut S,
    pattern: &[u8],
    max_bytes: usize,
    limit: Duration,
) -> Result<Vec<u8>, DriverError> {
    let mut received = Vec::new();
    let mut byte = [0u8; 1];
    // Byte-wise so nothing past the pattern is consumed
    while received.len() < max_bytes {
        match read_chunk(stream, &mut byte, limit).await? {
            Some(_) => received.push(byte[0]),
            None => break,
        }
        if !pattern.is_empty() && received.ends_with(pattern) {
            break;
        }
    }
    Ok(received)
}

#[async_trait]
impl<C: PortConnector> Driver for SerialDeviceDriver<C> {
    fn name(&self) -> &'static str {
        self.connector.name()
    }

    fn active_target(&self) -> Option<&ConnectTarget> {
        self.session.as_ref().map(|s| &s.target)
    }

    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), DriverError> {
        let ConnectTarget::Serial { port, baud } = target else {
            return Err(DriverError::InvalidInput(format!(
                "serial driver needs a serial target, got {}",
                target
            )));
        };

        self.disconnect().await?;

        let stream = self
            .connector
            .open(port, *baud)
            .await
            .map_err(|e| DriverError::Connection(format!("{:#}", e)))?;

        info!("[SERIAL] Opened {}", target);
        self.session = Some(Session {
            target: target.clone(),
            stream,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = PortStream::shutdown(&mut session.stream).await {
                warn!("[SERIAL] Error closing {}: {:#}", session.target, e);
            }
            info!("[SERIAL] Closed {}", session.target);
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8], read: &ReadSpec) -> Result<Option<Vec<u8>>, DriverError> {
        let session = self.session.as_mut().ok_or(DriverError::NotConnected)?;
        let stream = &mut session.stream;

        if read.flush {
            if let Err(e) = stream.discard_input() {
                warn!("[SERIAL] Could not flush input on {}: {:#}", session.target, e);
            }
        }

        stream.write_all(bytes).await?;
        stream.flush().await?;
        debug!("[SERIAL] -> {} {}", session.target, codec::format_hex(bytes));

        let received = match &read.mode {
            ReadMode::None => return Ok(None),
            ReadMode::Exact(len) => read_exact_or_timeout(stream, *len, read.timeout).await?,
            ReadMode::Until { pattern, max_bytes } => {
                read_until(stream, pattern, *max_bytes, read.timeout).await?
            }
        };

        if received.is_empty() {
            debug!("[SERIAL] No reply from {}", session.target);
            return Ok(None);
        }
        debug!("[SERIAL] <- {} {}", session.target, codec::format_hex(&received));
        Ok(Some(received))
    }
}
