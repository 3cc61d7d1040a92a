//! Three-phase file transfer to the controller
//!
//! 1. announce: `FileUpload(0, name)` (older firmware: `FileUpload(name)`)
//! 2. stream: `/f/b` + total length (10 chars) + md5 hex, the file, `/b/f`
//! 3. commit: `LuaUpLoadUpdate(name)` must return 0

use crate::rpc::{RpcClient, RpcValue};
use devq_shared::DriverError;
use md5::{Digest, Md5};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const STREAM_HEAD: &[u8] = b"/f/b";
pub const STREAM_TAIL: &[u8] = b"/b/f";

/// Bound on connecting and writing the stream phase
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes the controller counts besides the file itself
const FRAMING_OVERHEAD: usize = 4 + 46;

/// Header announcing the streamed file
pub fn stream_header(data: &[u8]) -> Vec<u8> {
    let total = data.len() + FRAMING_OVERHEAD;
    let digest = Md5::digest(data);
    let mut header = STREAM_HEAD.to_vec();
    header.extend_from_slice(format!("{:>10}{:x}", total, digest).as_bytes());
    header
}

fn check_code(method: &str, reply: &RpcValue) -> Result<(), DriverError> {
    match reply.status_code() {
        Some(0) | None => Ok(()),
        Some(code) => Err(DriverError::Status {
            method: method.to_string(),
            code,
        }),
    }
}

/// Phase 1
pub async fn announce(rpc: &RpcClient, name: &str) -> Result<(), DriverError> {
    let reply = match rpc.call("FileUpload", &[RpcValue::Int(0), name.into()]).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("[ARM] FileUpload(0, name) refused ({}), trying FileUpload(name)", e);
            rpc.call("FileUpload", &[name.into()]).await?
        }
    };
    check_code("FileUpload", &reply)
}

/// Phase 2
pub async fn stream(host: &str, port: u16, data: &[u8]) -> Result<(), DriverError> {
    let transfer = async {
        let mut socket = TcpStream::connect((host, port)).await?;
        socket.write_all(&stream_header(data)).await?;
        socket.write_all(data).await?;
        socket.write_all(STREAM_TAIL).await?;
        socket.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };

    match tokio::time::timeout(STREAM_TIMEOUT, transfer).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DriverError::Transfer {
            phase: "stream",
            reason: e.to_string(),
        }),
        Err(_) => Err(DriverError::Transfer {
            phase: "stream",
            reason: format!("timed out after {:?}", STREAM_TIMEOUT),
        }),
    }
}

/// Phase 3
pub async fn commit(rpc: &RpcClient, name: &str) -> Result<(), DriverError> {
    let reply = rpc.call("LuaUpLoadUpdate", &[name.into()]).await?;
    match reply.status_code() {
        Some(0) => Ok(()),
        Some(code) => Err(DriverError::Status {
            method: "LuaUpLoadUpdate".to_string(),
            code,
        }),
        None => Err(DriverError::Rpc {
            method: "LuaUpLoadUpdate".to_string(),
            reason: format!("no status code in reply {:?}", reply),
        }),
    }
}

/// Run all three phases for a local file
pub async fn transfer(rpc: &RpcClient, host: &str, stream_port: u16, path: &Path) -> Result<(), DriverError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DriverError::InvalidInput(format!("{} has no file name", path.display())))?;
    let data = tokio::fs::read(path).await?;

    info!("[ARM] Uploading {} ({} bytes)", name, data.len());

    announce(rpc, &name).await.map_err(|e| {
        warn!("[ARM] Announce of {} failed: {}", name, e);
        e
    })?;
    stream(host, stream_port, &data).await?;
    commit(rpc, &name).await?;

    info!("[ARM] Upload of {} committed", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::{MockController, Reply};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_stream_header_layout() {
        let header = stream_header(b"hello");
        assert_eq!(
            String::from_utf8(header).unwrap(),
            "/f/b        555d41402abc4b2a76b9719d911017c592"
        );
    }

    /// Accepts one stream connection and returns everything it received
    async fn stream_sink() -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_transfer_runs_all_phases() {
        let params = Arc::new(Mutex::new(Vec::new()));
        let seen = params.clone();
        let controller = MockController::start(move |_path, method, p| {
            seen.lock().unwrap().push((method.to_string(), p.to_vec()));
            match method {
                // Older firmware: two-argument form unknown
                "FileUpload" if p.len() == 2 => Reply::Fault(1, "bad arity".into()),
                "FileUpload" => Reply::Value(RpcValue::Int(0)),
                "LuaUpLoadUpdate" => Reply::Value(RpcValue::Array(vec![RpcValue::Int(0)])),
                _ => Reply::NotFound,
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pick.lua");
        std::fs::write(&path, b"hello").unwrap();

        let (port, sink) = stream_sink().await;
        transfer(&controller.client("/"), "127.0.0.1", port, &path)
            .await
            .unwrap();

        let mut expected = stream_header(b"hello");
        expected.extend_from_slice(b"hello/b/f");
        assert_eq!(sink.await.unwrap(), expected);

        let params = params.lock().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[1], ("FileUpload".to_string(), vec![RpcValue::from("pick.lua")]));
        assert_eq!(params[2], ("LuaUpLoadUpdate".to_string(), vec![RpcValue::from("pick.lua")]));
    }

    #[tokio::test]
    async fn test_commit_rejection_is_status_error() {
        let controller = MockController::start(|_path, method, _p| match method {
            "LuaUpLoadUpdate" => Reply::Value(RpcValue::Int(3)),
            _ => Reply::Value(RpcValue::Int(0)),
        })
        .await;

        let err = commit(&controller.client("/"), "x.lua").await.unwrap_err();
        assert!(matches!(err, DriverError::Status { code: 3, .. }));
    }

    #[tokio::test]
    async fn test_stream_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = stream("127.0.0.1", port, b"data").await.unwrap_err();
        assert!(matches!(err, DriverError::Transfer { phase: "stream", .. }));
    }
}
