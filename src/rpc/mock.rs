//! In-process stand-in for the controller's XML-RPC server

use super::xmlrpc::{decode_call, encode_fault, encode_response, RpcValue};
use super::RpcClient;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Scripted answer to one call
#[derive(Debug, Clone)]
pub enum Reply {
    Value(RpcValue),
    Fault(i64, String),
    NotFound,
}

type Script = Arc<dyn Fn(&str, &str, &[RpcValue]) -> Reply + Send + Sync>;

pub struct MockController {
    addr: SocketAddr,
    calls: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockController {
    /// Serve on an ephemeral port; `script` gets (path, method, params)
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&str, &str, &[RpcValue]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let script: Script = Arc::new(script);

        let task = {
            let calls = calls.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, script.clone(), calls.clone()));
                }
            })
        };

        Self { addr, calls, task }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn client(&self, path: &str) -> RpcClient {
        RpcClient::new(&self.host(), self.port(), path, Duration::from_secs(2)).unwrap()
    }

    /// "path method" for every call received so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, script: Script, calls: Arc<Mutex<Vec<String>>>) {
    let mut reader = BufReader::new(stream);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let path = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string();

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let (method, params) = decode_call(&String::from_utf8_lossy(&body)).unwrap_or_default();
        calls.lock().unwrap().push(format!("{} {}", path, method));

        let (status, payload) = match (*script)(&path, &method, &params) {
            Reply::Value(value) => ("200 OK", encode_response(&value)),
            Reply::Fault(code, message) => ("200 OK", encode_fault(code, &message)),
            Reply::NotFound => ("404 Not Found", String::new()),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
            status,
            payload.len(),
            payload
        );
        if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}
