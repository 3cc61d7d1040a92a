//! Completion State Machine
//!
//! Decides when a dispatched device operation has finished. Each tick polls a
//! prioritized cascade of probes; the first definitive reading wins. When the
//! budget runs out with nothing definitive the operation is taken as done.

use crate::driver::{DriverError, ProbeSet};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// One answer from a status probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReading {
    /// Device reports the operation finished / idle
    Finished,
    /// Device reports the operation still in progress
    Running,
    /// Device reports an explicit error state
    Fault(String),
}

/// One status-query strategy.
///
/// An `Err` means the probe could not tell; the cascade moves on.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Query the device once
    async fn poll(&self) -> Result<ProbeReading, DriverError>;
}

/// State of an in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Done,
    Failed,
}

/// Terminal outcome of completion detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Finished; `timed_out` marks the optimistic fallback
    Done { timed_out: bool },
    /// A probe reported an error state
    Failed { reason: String },
}

impl Verdict {
    pub fn is_done(&self) -> bool {
        matches!(self, Verdict::Done { .. })
    }
}

/// A dispatched long-running action awaiting a verdict
pub struct InFlightOperation {
    started_at: Instant,
    deadline: Instant,
    probes: ProbeSet,
    state: OperationState,
}

impl InFlightOperation {
    /// Start tracking an operation with the given probe order and budget
    pub fn new(probes: ProbeSet, budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            deadline: started_at + budget,
            probes,
            state: OperationState::Pending,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the fallback fires
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Apply one probe reading. Returns the verdict when it is terminal.
    ///
    /// Terminal states never transition again.
    pub fn process_reading(&mut self, reading: ProbeReading) -> Option<Verdict> {
        if self.state != OperationState::Pending {
            return None;
        }

        match reading {
            ProbeReading::Finished => {
                self.state = OperationState::Done;
                Some(Verdict::Done { timed_out: false })
            }
            ProbeReading::Fault(reason) => {
                self.state = OperationState::Failed;
                Some(Verdict::Failed { reason })
            }
            ProbeReading::Running => None,
        }
    }

    /// Resolve a pending operation through the timeout fallback
    fn expire(&mut self) -> Verdict {
        self.state = OperationState::Done;
        Verdict::Done { timed_out: true }
    }
}

/// Polls probe cascades until a verdict or the deadline
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    budget: Duration,
    poll_interval: Duration,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(crate::timing::COMPLETION_TIMEOUT_MS),
            Duration::from_millis(crate::timing::PROBE_INTERVAL_MS),
        )
    }
}

impl CompletionDetector {
    /// Create a detector with a wall-clock budget and tick interval
    pub fn new(budget: Duration, poll_interval: Duration) -> Self {
        Self {
            budget,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Begin tracking an operation observed by `probes`
    pub fn begin(&self, probes: ProbeSet) -> InFlightOperation {
        InFlightOperation::new(probes, self.budget)
    }

    /// Drive the cascade until a terminal verdict.
    ///
    /// Never returns later than the deadline (plus one probe call bounded by
    /// the remaining budget), and only returns the timeout fallback once the
    /// deadline has passed.
    pub async fn await_completion(&self, mut op: InFlightOperation) -> Verdict {
        let mut tick: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= op.deadline {
                let verdict = op.expire();
                warn!(
                    "[DETECT] No definitive status after {:?}, treating as completed",
                    now - op.started_at
                );
                return verdict;
            }

            tick += 1;
            if let Some(verdict) = self.poll_cascade(&mut op, tick).await {
                debug!(
                    "[DETECT] {:?} after {:?} ({} ticks)",
                    verdict,
                    op.started_at.elapsed(),
                    tick
                );
                return verdict;
            }

            let remaining = op.remaining(Instant::now());
            sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Poll every probe once in priority order
    async fn poll_cascade(&self, op: &mut InFlightOperation, tick: u32) -> Option<Verdict> {
        for index in 0..op.probes.len() {
            let remaining = op.remaining(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let probe = &op.probes[index];
            let name = probe.name();
            let reading = match timeout(remaining, probe.poll()).await {
                Ok(Ok(reading)) => reading,
                Ok(Err(e)) => {
                    debug!("[DETECT] tick {} probe {} inconclusive: {}", tick, name, e);
                    continue;
                }
                Err(_) => {
                    debug!("[DETECT] tick {} probe {} timed out", tick, name);
                    continue;
                }
            };

            if let Some(verdict) = op.process_reading(reading) {
                debug!("[DETECT] probe {} decided", name);
                return Some(verdict);
            }
        }
        None
    }
}
