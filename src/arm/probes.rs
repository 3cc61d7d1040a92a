//! Completion probes for a running Lua program

use super::realtime::FeedHandle;
use crate::rpc::{RpcClient, RpcValue};
use async_trait::async_trait;
use devq_shared::{DriverError, Probe, ProbeReading};
use std::sync::Arc;

/// Program state code the controller reports for a faulted program
pub const PROGRAM_FAULT_STATE: i64 = 4;

/// `CheckCommandFinish`: `(0, finished)` tuple or a truthy scalar
pub struct CommandFinishProbe {
    rpc: Arc<RpcClient>,
}

impl CommandFinishProbe {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Probe for CommandFinishProbe {
    fn name(&self) -> &'static str {
        "CheckCommandFinish"
    }

    async fn poll(&self) -> Result<ProbeReading, DriverError> {
        let reply = self.rpc.call("CheckCommandFinish", &[]).await?;
        let finished = match &reply {
            RpcValue::Array(items) => {
                items.first().and_then(RpcValue::as_i64) == Some(0)
                    && items.get(1).is_some_and(RpcValue::is_truthy)
            }
            scalar => scalar.is_truthy(),
        };
        Ok(if finished {
            ProbeReading::Finished
        } else {
            ProbeReading::Running
        })
    }
}

/// `GetRobotMotionState`: 0 means the arm is idle
pub struct MotionStateProbe {
    rpc: Arc<RpcClient>,
}

impl MotionStateProbe {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Probe for MotionStateProbe {
    fn name(&self) -> &'static str {
        "GetRobotMotionState"
    }

    async fn poll(&self) -> Result<ProbeReading, DriverError> {
        let reply = self.rpc.call("GetRobotMotionState", &[]).await?;
        match reply.as_i64() {
            Some(0) => Ok(ProbeReading::Finished),
            Some(_) => Ok(ProbeReading::Running),
            None => Err(DriverError::Rpc {
                method: "GetRobotMotionState".into(),
                reason: format!("unexpected reply {:?}", reply),
            }),
        }
    }
}

/// Program state queries, tried under each name older firmware used
pub struct ProgramStateProbe {
    rpc: Arc<RpcClient>,
}

impl ProgramStateProbe {
    pub const METHODS: [&'static str; 4] = [
        "GetProgramState",
        "ProgramState",
        "GetProgramRunState",
        "IsProgramRunning",
    ];

    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    fn interpret(method: &str, reply: &RpcValue) -> ProbeReading {
        let (code, state) = match reply {
            RpcValue::Array(items) => {
                let state = match items.get(1).and_then(RpcValue::as_i64) {
                    Some(state) => state,
                    // GetProgramState always pairs the code with a state
                    None if method == Self::METHODS[0] => return ProbeReading::Running,
                    None => 0,
                };
                (items.first().and_then(RpcValue::as_i64), state)
            }
            RpcValue::Nil => (Some(0), 0),
            scalar => (Some(0), scalar.as_i64().unwrap_or(1)),
        };

        match (code, state) {
            (Some(0), 0) => ProbeReading::Finished,
            (_, PROGRAM_FAULT_STATE) => {
                ProbeReading::Fault(format!("program state {}", PROGRAM_FAULT_STATE))
            }
            _ => ProbeReading::Running,
        }
    }
}

#[async_trait]
impl Probe for ProgramStateProbe {
    fn name(&self) -> &'static str {
        "GetProgramState"
    }

    async fn poll(&self) -> Result<ProbeReading, DriverError> {
        let mut last_error = None;
        let mut answered = false;

        for method in Self::METHODS {
            match self.rpc.call(method, &[]).await {
                Ok(reply) => match Self::interpret(method, &reply) {
                    ProbeReading::Running => answered = true,
                    definitive => return Ok(definitive),
                },
                Err(e) => last_error = Some(e),
            }
        }

        match (answered, last_error) {
            (true, _) | (false, None) => Ok(ProbeReading::Running),
            (false, Some(e)) => Err(e),
        }
    }
}

/// Realtime `robot_state`: 1 (stopped) means done, a non-zero main code is a fault
pub struct RobotStateProbe {
    feed: FeedHandle,
}

impl RobotStateProbe {
    pub fn new(feed: FeedHandle) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl Probe for RobotStateProbe {
    fn name(&self) -> &'static str {
        "robot_state"
    }

    async fn poll(&self) -> Result<ProbeReading, DriverError> {
        let snapshot = self.feed.fresh().await.ok_or(DriverError::Timeout)?;
        if snapshot.main_code != 0 {
            return Ok(ProbeReading::Fault(format!(
                "controller error {}/{}",
                snapshot.main_code, snapshot.sub_code
            )));
        }
        Ok(match snapshot.robot_state {
            1 => ProbeReading::Finished,
            _ => ProbeReading::Running,
        })
    }
}

/// Realtime `program_state`: 1 (stopped) means done
pub struct ProgramStopProbe {
    feed: FeedHandle,
}

impl ProgramStopProbe {
    pub fn new(feed: FeedHandle) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl Probe for ProgramStopProbe {
    fn name(&self) -> &'static str {
        "program_state"
    }

    async fn poll(&self) -> Result<ProbeReading, DriverError> {
        let snapshot = self.feed.fresh().await.ok_or(DriverError::Timeout)?;
        Ok(match snapshot.program_state {
            1 => ProbeReading::Finished,
            _ => ProbeReading::Running,
        })
    }
}
