//! Controller backends
//!
//! The SDK backend pairs XML-RPC at `/` with the realtime status feed. The raw
//! backend is plain XML-RPC on whichever path answers. [`select_backend`]
//! picks the first one that works, SDK first.

use super::probes::{
    CommandFinishProbe, MotionStateProbe, ProgramStateProbe, ProgramStopProbe, RobotStateProbe,
};
use super::realtime::RealtimeFeed;
use crate::rpc::RpcClient;
use devq_shared::driver::ProbeSet;
use devq_shared::DriverError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paths the raw backend tries, in order
pub const RPC_PATHS: [&str; 3] = ["/RPC2", "/RPC", "/"];

/// A connected way of talking to the controller
pub trait ArmBackend: Send + Sync {
    /// Human-readable name for this backend
    fn name(&self) -> &'static str;

    /// RPC endpoint used for commands
    fn rpc(&self) -> &Arc<RpcClient>;

    /// Probes watching a running program, highest priority first
    fn completion_probes(&self) -> ProbeSet;

    /// Release background resources
    fn close(&self) {}
}

/// XML-RPC at `/` plus the realtime status feed
pub struct SdkBackend {
    rpc: Arc<RpcClient>,
    feed: RealtimeFeed,
}

impl SdkBackend {
    pub fn new(rpc: RpcClient, feed: RealtimeFeed) -> Self {
        Self {
            rpc: Arc::new(rpc),
            feed,
        }
    }
}

impl ArmBackend for SdkBackend {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    fn completion_probes(&self) -> ProbeSet {
        vec![
            Box::new(CommandFinishProbe::new(self.rpc.clone())),
            Box::new(RobotStateProbe::new(self.feed.handle())),
            Box::new(ProgramStopProbe::new(self.feed.handle())),
        ]
    }

    fn close(&self) {
        self.feed.close();
    }
}

/// Plain XML-RPC
pub struct RawBackend {
    rpc: Arc<RpcClient>,
}

impl RawBackend {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc: Arc::new(rpc) }
    }
}

impl ArmBackend for RawBackend {
    fn name(&self) -> &'static str {
        "xmlrpc"
    }

    fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    fn completion_probes(&self) -> ProbeSet {
        vec![
            Box::new(CommandFinishProbe::new(self.rpc.clone())),
            Box::new(MotionStateProbe::new(self.rpc.clone())),
            Box::new(ProgramStateProbe::new(self.rpc.clone())),
        ]
    }
}

/// Where and how patiently to look for the controller
#[derive(Debug, Clone)]
pub struct BackendProbe {
    pub host: String,
    pub rpc_port: u16,
    pub state_port: u16,
    pub rpc_timeout: Duration,
}

/// Health check: `GetControllerIP`, falling back to `GetLuaList`
async fn health_check(rpc: &RpcClient) -> Result<(), DriverError> {
    match rpc.call("GetControllerIP", &[]).await {
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("[ARM] GetControllerIP failed at {}: {}", rpc.url(), e);
            rpc.call("GetLuaList", &[]).await.map(|_| ())
        }
    }
}

async fn try_sdk(probe: &BackendProbe) -> Result<SdkBackend, DriverError> {
    let feed = RealtimeFeed::connect(&probe.host, probe.state_port, probe.rpc_timeout)
        .await
        .map_err(|e| DriverError::Connection(format!("status feed: {}", e)))?;
    let rpc = RpcClient::new(&probe.host, probe.rpc_port, "/", probe.rpc_timeout)?;
    rpc.call("GetControllerIP", &[]).await?;
    Ok(SdkBackend::new(rpc, feed))
}

async fn try_raw(probe: &BackendProbe) -> Result<RawBackend, DriverError> {
    let mut last_error = None;
    for path in RPC_PATHS {
        let rpc = RpcClient::new(&probe.host, probe.rpc_port, path, probe.rpc_timeout)?;
        match health_check(&rpc).await {
            Ok(()) => return Ok(RawBackend::new(rpc)),
            Err(e) => {
                debug!("[ARM] No XML-RPC endpoint at {}: {}", rpc.url(), e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| DriverError::Connection("no RPC path to try".into())))
}

/// Connect with the highest-priority backend that answers
pub async fn select_backend(probe: &BackendProbe) -> Result<Box<dyn ArmBackend>, DriverError> {
    match try_sdk(probe).await {
        Ok(backend) => {
            info!("[ARM] Using SDK backend at {}", backend.rpc().url());
            return Ok(Box::new(backend));
        }
        Err(e) => warn!("[ARM] SDK backend unavailable: {}", e),
    }

    match try_raw(probe).await {
        Ok(backend) => {
            info!("[ARM] Using raw XML-RPC backend at {}", backend.rpc().url());
            Ok(Box::new(backend))
        }
        Err(e) => Err(DriverError::Connection(format!(
            "no controller answered at {}:{}: {}",
            probe.host, probe.rpc_port, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::{MockController, Reply};
    use crate::rpc::RpcValue;
    use tokio::net::TcpListener;

    fn probe_for(controller: &MockController, state_port: u16) -> BackendProbe {
        BackendProbe {
            host: controller.host(),
            rpc_port: controller.port(),
            state_port,
            rpc_timeout: Duration::from_secs(2),
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_sdk_preferred_when_feed_answers() {
        let controller =
            MockController::start(|_path, _method, _p| Reply::Value(RpcValue::Int(0))).await;
        let feed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let state_port = feed.local_addr().unwrap().port();

        let backend = select_backend(&probe_for(&controller, state_port))
            .await
            .unwrap();
        assert_eq!(backend.name(), "sdk");
        assert_eq!(backend.completion_probes().len(), 3);
        assert!(backend.rpc().url().ends_with('/'));
        backend.close();
    }

    #[tokio::test]
    async fn test_raw_probes_paths_in_order() {
        // Only "/" serves, and only GetLuaList
        let controller = MockController::start(|path, method, _p| match (path, method) {
            ("/", "GetLuaList") => Reply::Value(RpcValue::Array(vec![])),
            ("/", _) => Reply::Fault(-1, "unsupported".into()),
            _ => Reply::NotFound,
        })
        .await;
        let state_port = closed_port().await;

        let backend = select_backend(&probe_for(&controller, state_port))
            .await
            .unwrap();
        assert_eq!(backend.name(), "xmlrpc");
        assert_eq!(
            controller.calls(),
            vec![
                "/RPC2 GetControllerIP",
                "/RPC2 GetLuaList",
                "/RPC GetControllerIP",
                "/RPC GetLuaList",
                "/ GetControllerIP",
                "/ GetLuaList",
            ]
        );
    }

    #[tokio::test]
    async fn test_no_backend_is_connection_error() {
        let controller = MockController::start(|_path, _method, _p| Reply::NotFound).await;
        let state_port = closed_port().await;

        assert!(matches!(
            select_backend(&probe_for(&controller, state_port)).await,
            Err(DriverError::Connection(_))
        ));
    }
}
