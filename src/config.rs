//! Arm instance configuration

use anyhow::{Context, Result};
use devq_shared::config::{ConfigError, EnvFile};
use devq_shared::{
    timing, CompletionDetector, ConnectTarget, ConnectionRegistry, DispatcherConfig, QueueConfig,
};
use std::path::Path;
use std::time::Duration;

/// Registry name of the configured controller
pub const ARM_DEVICE: &str = "arm";

/// Controller address and RPC settings
#[derive(Debug, Clone, PartialEq)]
pub struct ArmConfig {
    pub host: String,
    pub rpc_port: u16,
    pub stream_port: u16,
    pub state_port: u16,
    pub rpc_timeout: Duration,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            host: "192.168.58.2".into(),
            rpc_port: 20003,
            stream_port: 20010,
            state_port: 20004,
            rpc_timeout: Duration::from_secs(3),
        }
    }
}

impl ArmConfig {
    pub fn from_env(env: &EnvFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env.get("ROBOT_IP").unwrap_or(defaults.host.as_str()).to_string(),
            rpc_port: env.parse_any_or(&["ROBOT_PORT", "XMLRPC_PORT"], defaults.rpc_port)?,
            stream_port: env.parse_any_or(&["TCP_PORT", "TCP_UPLOAD_PORT"], defaults.stream_port)?,
            state_port: env.parse_or("STATE_PORT", defaults.state_port)?,
            rpc_timeout: env.seconds_or("RPC_TIMEOUT", defaults.rpc_timeout)?,
        })
    }

    /// Connection target of the configured controller
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget::Network {
            host: self.host.clone(),
            rpc_port: self.rpc_port,
            stream_port: self.stream_port,
        }
    }
}

/// Everything the arm instance reads from its config file
pub struct Settings {
    pub arm: ArmConfig,
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
        let arm = ArmConfig::from_env(env)?;

        let mut registry = ConnectionRegistry::from_env(env)?;
        if registry.resolve(ARM_DEVICE).is_none() {
            registry.insert(ARM_DEVICE, arm.target());
        }

        let budget = env.seconds_or(
            "COMPLETION_TIMEOUT",
            Duration::from_millis(timing::COMPLETION_TIMEOUT_MS),
        )?;

        Ok(Self {
            queue: QueueConfig::from_env(env)?,
            dispatcher: DispatcherConfig::from_env(env)?,
            detector: CompletionDetector::new(budget, Duration::from_millis(timing::PROBE_INTERVAL_MS)),
            registry,
            arm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_env(&EnvFile::parse("")).unwrap();
        assert_eq!(settings.arm, ArmConfig::default());
        assert_eq!(settings.detector.budget(), Duration::from_secs(8));
        assert_eq!(settings.registry.resolve(ARM_DEVICE), Some(&settings.arm.target()));
    }

    #[test]
    fn test_aliases_and_overrides() {
        let env = EnvFile::parse(
            "ROBOT_IP=10.0.0.5\nXMLRPC_PORT=8080\nTCP_UPLOAD_PORT=9000\nRPC_TIMEOUT=1.5\nCOMPLETION_TIMEOUT=2\n",
        );
        let settings = Settings::from_env(&env).unwrap();
        assert_eq!(settings.arm.host, "10.0.0.5");
        assert_eq!(settings.arm.rpc_port, 8080);
        assert_eq!(settings.arm.stream_port, 9000);
        assert_eq!(settings.arm.rpc_timeout, Duration::from_millis(1500));
        assert_eq!(settings.detector.budget(), Duration::from_secs(2));

        let primary = EnvFile::parse("ROBOT_PORT=1\nXMLRPC_PORT=2\n");
        assert_eq!(ArmConfig::from_env(&primary).unwrap().rpc_port, 1);
    }

    #[test]
    fn test_invalid_port_is_error() {
        assert!(Settings::from_env(&EnvFile::parse("ROBOT_PORT=http")).is_err());
    }
}
