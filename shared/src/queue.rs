//! File Queue - the directory exchange that carries commands and responses
//!
//! Each command file moves through a fixed pipeline:
//! ```text
//! <input>/x.json ──claim──▶ <input>/x.json.claimed ──dispatch──▶
//!   <output>/.x.response.json.partial ──rename──▶ <output>/x.response.json
//!   ──▶ claimed input removed
//! ```
//!
//! The claim rename makes sure a scan never hands the same file out twice.
//! The input is only removed after its response is published, so a crash in
//! between leaves a claimed file that the next run dispatches again.

use crate::command::{status, Command, Response};
use crate::config::{ConfigError, EnvFile};
use crate::naming::{CLAIM_SUFFIX, COMMAND_EXT, PARTIAL_SUFFIX, RESPONSE_SUFFIX};
use crate::timing;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Consumer of parsed command documents
#[async_trait]
pub trait QueueHandler: Send {
    /// Turn one parsed document into its response. Must not fail.
    async fn handle(&mut self, document: Value) -> Response;

    /// Called once when the queue loop stops
    async fn shutdown(&mut self) {}
}

/// Queue directories and pacing
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Idle sleep between scans
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("inbox"),
            output_dir: PathBuf::from("outbox"),
            poll_interval: Duration::from_millis(timing::QUEUE_POLL_INTERVAL_MS),
        }
    }
}

impl QueueConfig {
    /// Read `INPUT_DIR`, `OUTPUT_DIR` and `POLL_INTERVAL_MS`
    pub fn from_env(env: &EnvFile) -> Result<Self, ConfigError> {
        let poll_ms = env.parse_or("POLL_INTERVAL_MS", timing::QUEUE_POLL_INTERVAL_MS)?;
        Ok(Self {
            input_dir: env.dir_or("INPUT_DIR", "inbox"),
            output_dir: env.dir_or("OUTPUT_DIR", "outbox"),
            poll_interval: Duration::from_millis(poll_ms.max(1)),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// A command file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    path: PathBuf,
    /// File name without `.json` (and without the claim suffix)
    base: String,
    /// Left claimed by an earlier run
    orphaned: bool,
}

/// A response that could not be written yet
#[derive(Debug)]
struct Unpublished {
    claimed: PathBuf,
    output: PathBuf,
    body: Vec<u8>,
}

/// Classify a directory entry name
fn classify(name: &str) -> Option<(String, bool)> {
    let lower = name.to_ascii_lowercase();
    if name.starts_with('.') || lower.ends_with(RESPONSE_SUFFIX) {
        return None;
    }

    let (stem, orphaned) = match lower.strip_suffix(CLAIM_SUFFIX) {
        Some(_) => (&name[..name.len() - CLAIM_SUFFIX.len()], true),
        None => (name, false),
    };

    let stem_lower = stem.to_ascii_lowercase();
    if stem_lower.ends_with(RESPONSE_SUFFIX) || !stem_lower.ends_with(COMMAND_EXT) {
        return None;
    }

    let base = &stem[..stem.len() - COMMAND_EXT.len()];
    if base.is_empty() {
        return None;
    }
    Some((base.to_string(), orphaned))
}

/// Append a suffix to a path's file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Watches the input directory and feeds a handler one file at a time
pub struct FileQueue<H> {
    config: QueueConfig,
    handler: H,
    unpublished: Vec<Unpublished>,
}

impl<H: QueueHandler> FileQueue<H> {
    /// Create a new file queue
    pub fn new(config: QueueConfig, handler: H) -> Self {
        Self {
            config,
            handler,
            unpublished: Vec::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Number of responses waiting to be written
    pub fn unpublished_count(&self) -> usize {
        self.unpublished.len()
    }

    /// Create the queue directories
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.config.input_dir).await?;
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        Ok(())
    }

    /// Poll until `shutdown` resolves. Shutdown is only observed between ticks.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[QUEUE] Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.handler.shutdown().await;
        if !self.unpublished.is_empty() {
            warn!(
                "[QUEUE] Stopping with {} unpublished response(s); their inputs stay claimed",
                self.unpublished.len()
            );
        }
    }

    /// One scan: retry pending publications, then process every command file.
    ///
    /// Returns the number of files dispatched.
    pub async fn tick(&mut self) -> usize {
        self.retry_unpublished().await;

        let candidates = match self.scan().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(
                    "[QUEUE] Failed to scan {}: {}",
                    self.config.input_dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut processed = 0;
        for candidate in candidates {
            if self.process(candidate).await {
                processed += 1;
            }
        }
        processed
    }

    /// List command files in name order
    async fn scan(&self) -> io::Result<Vec<Candidate>> {
        let mut entries = tokio::fs::read_dir(&self.config.input_dir).await?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((base, orphaned)) = classify(name) else {
                continue;
            };

            let path = entry.path();
            if orphaned && self.unpublished.iter().any(|u| u.claimed == path) {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            candidates.push(Candidate {
                path,
                base,
                orphaned,
            });
        }

        candidates.sort_by(|a, b| a.base.cmp(&b.base).then(a.orphaned.cmp(&b.orphaned)));
        Ok(candidates)
    }

    /// Claim, read, dispatch and publish one file
    async fn process(&mut self, candidate: Candidate) -> bool {
        let claimed = if candidate.orphaned {
            warn!(
                "[QUEUE] Re-dispatching {} left claimed by an earlier run",
                candidate.path.display()
            );
            candidate.path.clone()
        } else {
            let claimed = with_suffix(&candidate.path, CLAIM_SUFFIX);
            if let Err(e) = tokio::fs::rename(&candidate.path, &claimed).await {
                debug!(
                    "[QUEUE] Could not claim {}: {}",
                    candidate.path.display(),
                    e
                );
                return false;
            }
            claimed
        };

        info!("[QUEUE] Processing file: {}.json", candidate.base);

        let raw = match tokio::fs::read(&claimed).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("[QUEUE] Failed to read {}: {}", claimed.display(), e);
                self.release(&candidate, &claimed).await;
                return false;
            }
        };

        let response = match serde_json::from_slice::<Value>(&raw) {
            Ok(document) => {
                let id = Command::id_of(&document);
                match AssertUnwindSafe(self.handler.handle(document))
                    .catch_unwind()
                    .await
                {
                    Ok(response) => response,
                    Err(panic) => {
                        error!(
                            "[QUEUE] Handler panicked on {}.json: {}",
                            candidate.base,
                            panic_message(&*panic)
                        );
                        Response::failure(id.as_deref(), status::FAILED)
                    }
                }
            }
            Err(e) => {
                warn!("[QUEUE] {}.json is not valid JSON: {}", candidate.base, e);
                Response::invalid_json()
            }
        };

        let body = match serde_json::to_vec(&response) {
            Ok(body) => body,
            Err(e) => {
                error!("[QUEUE] Failed to encode response: {}", e);
                self.release(&candidate, &claimed).await;
                return false;
            }
        };

        let output = self
            .config
            .output_dir
            .join(format!("{}{}", candidate.base, RESPONSE_SUFFIX));

        let pending = Unpublished {
            claimed,
            output,
            body,
        };
        if let Err(e) = Self::publish(&pending).await {
            error!(
                "[QUEUE] Failed to write {}: {} (will retry)",
                pending.output.display(),
                e
            );
            self.unpublished.push(pending);
        }
        true
    }

    /// Write the response atomically, then drop the claimed input
    async fn publish(pending: &Unpublished) -> io::Result<()> {
        let partial = {
            let name = pending.output.file_name().unwrap_or_default().to_string_lossy();
            pending
                .output
                .with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
        };

        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(&pending.body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, &pending.output).await?;

        debug!("[QUEUE] Wrote {}", pending.output.display());

        if let Err(e) = tokio::fs::remove_file(&pending.claimed).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "[QUEUE] Failed to remove {}: {}",
                    pending.claimed.display(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn retry_unpublished(&mut self) {
        let mut still_pending = Vec::new();
        for pending in std::mem::take(&mut self.unpublished) {
            match Self::publish(&pending).await {
                Ok(()) => info!("[QUEUE] Published {} on retry", pending.output.display()),
                Err(e) => {
                    debug!("[QUEUE] Retry of {} failed: {}", pending.output.display(), e);
                    still_pending.push(pending);
                }
            }
        }
        self.unpublished = still_pending;
    }

    /// Put a fresh claim back so the next tick sees the file again
    async fn release(&self, candidate: &Candidate, claimed: &Path) {
        if candidate.orphaned {
            return;
        }
        if let Err(e) = tokio::fs::rename(claimed, &candidate.path).await {
            error!(
                "[QUEUE] Failed to release claim on {}: {}",
                claimed.display(),
                e
            );
        }
    }
}
