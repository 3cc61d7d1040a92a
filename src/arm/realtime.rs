//! Realtime status feed of the controller
//!
//! The controller pushes state frames on its status port:
//! ```text
//! [ 0x5A5A (u16 LE) ][ frame_cnt (u8) ][ data_len (u16 LE) ][ data_len bytes ]
//! ```
//! The payload starts with the fields of [`StateSnapshot`] and ends with a
//! u16 LE checksum: the wrapping sum of every frame byte before it.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub const FRAME_HEAD: u16 = 0x5A5A;

/// head + frame_cnt + data_len
pub const HEADER_LEN: usize = 5;

/// program_state + robot_state + main_code + sub_code + robot_mode
pub const SNAPSHOT_LEN: usize = 11;

/// Snapshots older than this no longer describe the arm
pub const STALE_AFTER: Duration = Duration::from_secs(1);

/// Errors while decoding status frames
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateFrameError {
    #[error("Payload too short: {0} bytes")]
    ShortPayload(usize),

    #[error("Checksum mismatch: frame says {expected:#06x}, computed {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },
}

/// Decoded prefix of one status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub frame_cnt: u8,
    /// 1 stop, 2 run, 3 pause
    pub program_state: u8,
    /// 1 stop, 2 run, 3 pause, 4 drag
    pub robot_state: u8,
    pub main_code: i32,
    pub sub_code: i32,
    pub robot_mode: u8,
}

/// Wrapping sum of bytes
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, b| sum.wrapping_add(*b as u16))
}

/// Try to decode one frame from the front of `buf`.
///
/// Bytes before a frame head are discarded. Returns `Ok(None)` when more data
/// is needed. A rejected frame is consumed so the stream can move on.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<StateSnapshot>, StateFrameError> {
    let head = FRAME_HEAD.to_le_bytes();
    match buf.windows(2).position(|w| w == head) {
        Some(0) => {}
        Some(skip) => buf.advance(skip),
        None => {
            // Keep a trailing half head
            let keep = usize::from(buf.last() == Some(&head[0]));
            let len = buf.len();
            buf.advance(len - keep);
            return Ok(None);
        }
    }

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let data_len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
    if data_len < SNAPSHOT_LEN + 2 {
        buf.advance(2);
        return Err(StateFrameError::ShortPayload(data_len));
    }

    let frame_len = HEADER_LEN + data_len;
    if buf.len() < frame_len {
        return Ok(None);
    }

    let mut frame = buf.split_to(frame_len);
    let expected = u16::from_le_bytes([frame[frame_len - 2], frame[frame_len - 1]]);
    let actual = checksum(&frame[..frame_len - 2]);
    if expected != actual {
        return Err(StateFrameError::Checksum { expected, actual });
    }

    frame.advance(2);
    let frame_cnt = frame.get_u8();
    frame.advance(2);

    Ok(Some(StateSnapshot {
        frame_cnt,
        program_state: frame.get_u8(),
        robot_state: frame.get_u8(),
        main_code: frame.get_i32_le(),
        sub_code: frame.get_i32_le(),
        robot_mode: frame.get_u8(),
    }))
}

#[derive(Debug, Clone, Copy)]
struct Stamped {
    at: Instant,
    snapshot: StateSnapshot,
}

/// Read side of the feed, shared with completion probes
#[derive(Debug, Clone, Default)]
pub struct FeedHandle {
    latest: Arc<RwLock<Option<Stamped>>>,
}

impl FeedHandle {
    /// Newest snapshot, unless it is stale
    pub async fn fresh(&self) -> Option<StateSnapshot> {
        let latest = *self.latest.read().await;
        latest
            .filter(|s| s.at.elapsed() <= STALE_AFTER)
            .map(|s| s.snapshot)
    }

    async fn store(&self, snapshot: StateSnapshot) {
        *self.latest.write().await = Some(Stamped {
            at: Instant::now(),
            snapshot,
        });
    }
}

/// Background reader keeping the newest status snapshot
pub struct RealtimeFeed {
    handle: FeedHandle,
    task: JoinHandle<()>,
}

impl RealtimeFeed {
    /// Connect to the status port
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "status feed connect timed out"))??;

        info!("[ARM] Realtime feed connected to {}:{}", host, port);
        Ok(Self::spawn(stream))
    }

    /// Start reading frames from any byte stream
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = FeedHandle::default();
        let task = tokio::spawn(read_loop(reader, handle.clone()));
        Self { handle, task }
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Stop the reader task
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_loop<R>(mut reader: R, handle: FeedHandle)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                warn!("[ARM] Realtime feed closed by controller");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[ARM] Realtime feed read error: {}", e);
                return;
            }
        }

        loop {
            match decode_frame(&mut buf) {
                Ok(Some(snapshot)) => {
                    trace!(
                        "[ARM] Status frame {} mode {}",
                        snapshot.frame_cnt,
                        snapshot.robot_mode
                    );
                    handle.store(snapshot).await
                }
                Ok(None) => break,
                Err(e) => debug!("[ARM] Dropped status frame: {}", e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::BufMut;

    /// Build a valid frame carrying `snapshot` plus `extra` payload bytes
    pub(crate) fn frame(snapshot: &StateSnapshot, extra: usize) -> Vec<u8> {
        let data_len = SNAPSHOT_LEN + extra + 2;
        let mut buf = BytesMut::new();
        buf.put_u16_le(FRAME_HEAD);
        buf.put_u8(snapshot.frame_cnt);
        buf.put_u16_le(data_len as u16);
        buf.put_u8(snapshot.program_state);
        buf.put_u8(snapshot.robot_state);
        buf.put_i32_le(snapshot.main_code);
        buf.put_i32_le(snapshot.sub_code);
        buf.put_u8(snapshot.robot_mode);
        buf.put_bytes(0xEE, extra);
        let sum = checksum(&buf);
        buf.put_u16_le(sum);
        buf.to_vec()
    }

    pub(crate) fn snapshot(program_state: u8, robot_state: u8, main_code: i32) -> StateSnapshot {
        StateSnapshot {
            frame_cnt: 7,
            program_state,
            robot_state,
            main_code,
            sub_code: 0,
            robot_mode: 0,
        }
    }

    #[test]
    fn test_decode_frame_with_trailing_fields() {
        let expected = StateSnapshot {
            frame_cnt: 3,
            program_state: 2,
            robot_state: 2,
            main_code: 0,
            sub_code: -1,
            robot_mode: 1,
        };
        let mut buf = BytesMut::from(&frame(&expected, 40)[..]);
        assert_eq!(decode_frame(&mut buf), Ok(Some(expected)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_resync_after_garbage_and_partial_frame() {
        let a = snapshot(1, 1, 0);
        let bytes = frame(&a, 0);

        let mut buf = BytesMut::from(&[0x00, 0x13, 0x5A][..]);
        assert_eq!(decode_frame(&mut buf), Ok(None));
        // Only the possible half head survives
        assert_eq!(&buf[..], &[0x5A]);

        buf.clear();
        buf.extend_from_slice(&[0xFF, 0xFF]);
        buf.extend_from_slice(&bytes[..8]);
        assert_eq!(decode_frame(&mut buf), Ok(None));
        buf.extend_from_slice(&bytes[8..]);
        assert_eq!(decode_frame(&mut buf), Ok(Some(a)));
    }

    #[test]
    fn test_bad_checksum_is_consumed() {
        let mut bytes = frame(&snapshot(1, 1, 0), 0);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        bytes.extend(frame(&snapshot(2, 2, 0), 0));

        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(StateFrameError::Checksum { .. })
        ));
        assert_eq!(decode_frame(&mut buf), Ok(Some(snapshot(2, 2, 0))));
    }

    #[test]
    fn test_short_payload_rejected() {
        let mut buf = BytesMut::from(&[0x5A, 0x5A, 0x01, 0x04, 0x00, 1, 2, 3, 4][..]);
        assert_eq!(decode_frame(&mut buf), Err(StateFrameError::ShortPayload(4)));
    }

    #[tokio::test]
    async fn test_feed_keeps_newest_snapshot() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let feed = RealtimeFeed::spawn(rx);
        let handle = feed.handle();
        assert_eq!(handle.fresh().await, None);

        use tokio::io::AsyncWriteExt;
        tx.write_all(&frame(&snapshot(2, 2, 0), 0)).await.unwrap();
        tx.write_all(&frame(&snapshot(1, 1, 0), 0)).await.unwrap();

        let mut latest = None;
        for _ in 0..50 {
            latest = handle.fresh().await;
            if latest == Some(snapshot(1, 1, 0)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(latest, Some(snapshot(1, 1, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_goes_stale() {
        let handle = FeedHandle::default();
        handle.store(snapshot(1, 1, 0)).await;
        assert!(handle.fresh().await.is_some());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(handle.fresh().await, None);
    }
}
