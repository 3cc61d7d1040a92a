//! Robot arm driver

use super::backend::{select_backend, ArmBackend, BackendProbe};
use super::upload;
use crate::rpc::RpcValue;
use async_trait::async_trait;
use devq_shared::driver::ProbeSet;
use devq_shared::{ConnectTarget, Driver, DriverError, UploadKind};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory the controller keeps user programs in
pub const PROGRAM_ROOT: &str = "/fruser";

/// Dedicated point-table upload calls, tried in order
pub const POINT_TABLE_METHODS: [&str; 3] =
    ["PointTableUpLoad", "PointTableUpload", "PointTableUpdateLua"];

/// `PointTableSwitch` code for a table that is already active
pub const POINT_TABLE_ALREADY_ACTIVE: i64 = 130;

/// Pause between a point-table upload and its activation
pub const SWITCH_SETTLE: Duration = Duration::from_millis(500);

struct Session {
    target: ConnectTarget,
    host: String,
    stream_port: u16,
    backend: Box<dyn ArmBackend>,
}

/// Drives one arm controller through its best available backend
pub struct RobotArmDriver {
    state_port: u16,
    rpc_timeout: Duration,
    session: Option<Session>,
}

impl RobotArmDriver {
    pub fn new(state_port: u16, rpc_timeout: Duration) -> Self {
        Self {
            state_port,
            rpc_timeout,
            session: None,
        }
    }

    /// Name of the active backend
    pub fn backend_name(&self) -> Option<&'static str> {
        self.session.as_ref().map(|s| s.backend.name())
    }

    fn session(&self) -> Result<&Session, DriverError> {
        self.session.as_ref().ok_or(DriverError::NotConnected)
    }

    async fn transfer(&self, path: &Path) -> Result<(), DriverError> {
        let session = self.session()?;
        upload::transfer(session.backend.rpc(), &session.host, session.stream_port, path).await
    }
}

#[async_trait]
impl Driver for RobotArmDriver {
    fn name(&self) -> &'static str {
        "robot-arm"
    }

    fn active_target(&self) -> Option<&ConnectTarget> {
        self.session.as_ref().map(|s| &s.target)
    }

    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), DriverError> {
        let ConnectTarget::Network {
            host,
            rpc_port,
            stream_port,
        } = target
        else {
            return Err(DriverError::InvalidInput(format!(
                "robot arm needs a network target, got {}",
                target
            )));
        };

        self.disconnect().await?;

        let probe = BackendProbe {
            host: host.clone(),
            rpc_port: *rpc_port,
            state_port: self.state_port,
            rpc_timeout: self.rpc_timeout,
        };
        let backend = select_backend(&probe).await?;

        info!("[ARM] Connected to {} via {}", target, backend.name());
        self.session = Some(Session {
            target: target.clone(),
            host: host.clone(),
            stream_port: *stream_port,
            backend,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(session) = self.session.take() {
            session.backend.close();
            info!("[ARM] Disconnected from {}", session.target);
        }
        Ok(())
    }

    async fn upload(&mut self, resource: &Path, kind: UploadKind) -> Result<(), DriverError> {
        debug!("[ARM] Generic {:?} upload of {}", kind, resource.display());
        self.transfer(resource).await
    }

    async fn upload_point_table(&mut self, path: &Path, legacy: bool) -> Result<(), DriverError> {
        if legacy {
            return self.transfer(path).await;
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let absolute = absolute.to_string_lossy().into_owned();
        let rpc = self.session()?.backend.rpc().clone();

        for method in POINT_TABLE_METHODS {
            match rpc.call_status(method, &[RpcValue::from(absolute.as_str())]).await {
                Ok(0) => {
                    info!("[ARM] {} accepted {}", method, absolute);
                    return Ok(());
                }
                Ok(code) => debug!("[ARM] {} returned {}", method, code),
                Err(e) => debug!("[ARM] {} failed: {}", method, e),
            }
        }

        warn!("[ARM] No point-table call accepted {}, using generic transfer", absolute);
        self.transfer(path).await
    }

    async fn switch_point_table(&mut self, name: &str) -> Result<(), DriverError> {
        let rpc = self.session()?.backend.rpc().clone();
        tokio::time::sleep(SWITCH_SETTLE).await;

        match rpc.call_status("PointTableSwitch", &[name.into()]).await? {
            0 => Ok(()),
            POINT_TABLE_ALREADY_ACTIVE => {
                debug!("[ARM] Point table {} already active", name);
                Ok(())
            }
            code => Err(DriverError::Status {
                method: "PointTableSwitch".into(),
                code,
            }),
        }
    }

    async fn load_program(&mut self, file: &str) -> Result<(), DriverError> {
        let remote = format!("{}/{}", PROGRAM_ROOT, file.trim_start_matches('/'));
        debug!("[ARM] ProgramLoad {}", remote);
        self.session()?
            .backend
            .rpc()
            .expect_ok("ProgramLoad", &[remote.into()])
            .await
    }

    async fn run_program(&mut self) -> Result<ProbeSet, DriverError> {
        let session = self.session()?;
        session.backend.rpc().expect_ok("ProgramRun", &[]).await?;
        Ok(session.backend.completion_probes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::{MockController, Reply};
    use devq_shared::{CompletionDetector, Verdict};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Raw-backend controller recording call parameters
    async fn controller(
        script: impl Fn(&str, &[RpcValue]) -> Reply + Send + Sync + 'static,
    ) -> (MockController, Arc<Mutex<Vec<(String, Vec<RpcValue>)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let controller = MockController::start(move |_path, method, params| {
            seen.lock().unwrap().push((method.to_string(), params.to_vec()));
            script(method, params)
        })
        .await;
        (controller, log)
    }

    async fn connected(controller: &MockController, stream_port: u16) -> RobotArmDriver {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let state_port = closed.local_addr().unwrap().port();
        drop(closed);

        let mut driver = RobotArmDriver::new(state_port, Duration::from_secs(2));
        driver
            .connect(&ConnectTarget::Network {
                host: controller.host(),
                rpc_port: controller.port(),
                stream_port,
            })
            .await
            .unwrap();
        driver
    }

    fn methods(log: &Arc<Mutex<Vec<(String, Vec<RpcValue>)>>>) -> Vec<String> {
        log.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    #[tokio::test]
    async fn test_serial_target_rejected() {
        let mut driver = RobotArmDriver::new(20004, Duration::from_secs(1));
        let err = driver
            .connect(&ConnectTarget::Serial {
                port: "COM7".into(),
                baud: 115_200,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidInput(_)));
        assert!(driver.active_target().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session_and_stops_old_feed() {
        let first = MockController::start(|_path, _method, _p| Reply::Value(RpcValue::Int(0))).await;
        let second = MockController::start(|_path, _method, _p| Reply::Value(RpcValue::Int(0))).await;
        let feed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let state_port = feed.local_addr().unwrap().port();

        let target = |controller: &MockController, stream_port| ConnectTarget::Network {
            host: controller.host(),
            rpc_port: controller.port(),
            stream_port,
        };

        let mut driver = RobotArmDriver::new(state_port, Duration::from_secs(2));
        driver.connect(&target(&first, 1)).await.unwrap();
        let (mut first_feed, _) = feed.accept().await.unwrap();
        assert_eq!(driver.backend_name(), Some("sdk"));

        driver.connect(&target(&second, 2)).await.unwrap();
        let (_second_feed, _) = feed.accept().await.unwrap();

        assert_eq!(driver.active_target(), Some(&target(&second, 2)));
        assert_eq!(driver.backend_name(), Some("sdk"));
        assert_eq!(second.calls(), vec!["/ GetControllerIP"]);

        // The first reader task is gone, so its socket reads EOF
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), first_feed.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_verbs_need_session() {
        let mut driver = RobotArmDriver::new(20004, Duration::from_secs(1));
        assert!(matches!(
            driver.load_program("a.lua").await,
            Err(DriverError::NotConnected)
        ));
        assert!(driver.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_run_program_loads_from_user_dir_and_completes() {
        let (controller, log) = controller(|method, _params| match method {
            "GetControllerIP" => Reply::Value(RpcValue::from("192.168.58.2")),
            "ProgramLoad" | "ProgramRun" => Reply::Value(RpcValue::Int(0)),
            "CheckCommandFinish" => Reply::Value(RpcValue::Int(1)),
            _ => Reply::Fault(-1, "unsupported".into()),
        })
        .await;
        let mut driver = connected(&controller, 1).await;
        assert_eq!(driver.backend_name(), Some("xmlrpc"));

        driver.load_program("pick.lua").await.unwrap();
        let probes = driver.run_program().await.unwrap();
        assert_eq!(probes.len(), 3);

        let detector = CompletionDetector::default();
        let verdict = detector.await_completion(detector.begin(probes)).await;
        assert_eq!(verdict, Verdict::Done { timed_out: false });

        let log = log.lock().unwrap();
        let load = log.iter().find(|(m, _)| m == "ProgramLoad").unwrap();
        assert_eq!(load.1, vec![RpcValue::from("/fruser/pick.lua")]);
    }

    #[tokio::test]
    async fn test_program_load_failure_is_status() {
        let (controller, _log) = controller(|method, _params| match method {
            "GetControllerIP" => Reply::Value(RpcValue::Int(0)),
            "ProgramLoad" => Reply::Value(RpcValue::Int(1)),
            _ => Reply::Fault(-1, "unsupported".into()),
        })
        .await;
        let mut driver = connected(&controller, 1).await;

        assert!(matches!(
            driver.load_program("missing.lua").await,
            Err(DriverError::Status { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_point_table_dedicated_call_then_switch() {
        let (controller, log) = controller(|method, _params| match method {
            "GetControllerIP" => Reply::Value(RpcValue::Int(0)),
            "PointTableUpLoad" => Reply::Fault(-1, "unsupported".into()),
            "PointTableUpload" => Reply::Value(RpcValue::Int(0)),
            "PointTableSwitch" => Reply::Value(RpcValue::Int(130)),
            _ => Reply::Fault(-1, "unsupported".into()),
        })
        .await;
        let mut driver = connected(&controller, 1).await;

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("points.db");
        std::fs::write(&db, b"db").unwrap();

        driver.upload_point_table(&db, false).await.unwrap();
        driver.switch_point_table("points.db").await.unwrap();

        assert_eq!(
            methods(&log)[1..],
            ["PointTableUpLoad", "PointTableUpload", "PointTableSwitch"]
        );
        let log = log.lock().unwrap();
        let RpcValue::Str(sent) = &log[2].1[0] else {
            panic!("expected a path argument");
        };
        assert!(Path::new(sent).is_absolute());
    }

    #[tokio::test]
    async fn test_point_table_falls_back_to_transfer() {
        let (controller, log) = controller(|method, _params| match method {
            "GetControllerIP" => Reply::Value(RpcValue::Int(0)),
            "PointTableUpLoad" | "PointTableUpload" | "PointTableUpdateLua" => {
                Reply::Value(RpcValue::Int(-2))
            }
            "FileUpload" | "LuaUpLoadUpdate" => Reply::Value(RpcValue::Int(0)),
            "PointTableSwitch" => Reply::Value(RpcValue::Int(5)),
            _ => Reply::Fault(-1, "unsupported".into()),
        })
        .await;

        let sink = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream_port = sink.local_addr().unwrap().port();
        let receiver = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let (mut socket, _) = sink.accept().await.unwrap();
            let mut data = Vec::new();
            socket.read_to_end(&mut data).await.unwrap();
            data
        });

        let mut driver = connected(&controller, stream_port).await;
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("points.db");
        std::fs::write(&db, b"db").unwrap();

        driver.upload_point_table(&db, false).await.unwrap();
        assert!(receiver.await.unwrap().ends_with(b"db/b/f"));
        assert!(methods(&log).ends_with(&["FileUpload".to_string(), "LuaUpLoadUpdate".to_string()]));

        assert!(matches!(
            driver.switch_point_table("points.db").await,
            Err(DriverError::Status { code: 5, .. })
        ));
    }
}
