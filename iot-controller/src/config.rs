//! IoT instance configuration

use anyhow::{Context, Result};
use devq_shared::config::EnvFile;
use devq_shared::{CompletionDetector, ConnectionRegistry, DispatcherConfig, QueueConfig};
use std::path::{Path, PathBuf};

/// Preferred config file
pub const PRIMARY_CONFIG: &str = ".env_iot_config";

/// Used when the preferred file does not exist
pub const FALLBACK_CONFIG: &str = "config.env";

/// Pick the config file: an explicit path wins, then the preferred file, then the fallback
pub fn resolve_config_path(explicit: Option<PathBuf>, dir: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let primary = dir.join(PRIMARY_CONFIG);
    if primary.exists() {
        primary
    } else {
        dir.join(FALLBACK_CONFIG)
    }
}

/// Everything the IoT instance reads from its config file
pub struct Settings {
    pub queue: QueueConfig,
    pub dispatcher: DispatcherConfig,
    pub detector: CompletionDetector,
    pub registry: ConnectionRegistry,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let env = EnvFile::load(path)?;
        Self::from_env(&env).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn from_env(env: &EnvFile) -> Result<Self> {
        Ok(Self {
            queue: QueueConfig::from_env(env)?,
            dispatcher: DispatcherConfig::from_env(env)?,
            detector: CompletionDetector::default(),
            registry: ConnectionRegistry::from_env(env)?,
        })
    }
}
