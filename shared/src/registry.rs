//! Connection Registry - resolved name → address table
//!
//! Built once at startup from the config file and read-only afterwards.

use crate::config::{ConfigError, EnvFile};
use crate::driver::ConnectTarget;
use std::collections::BTreeMap;
use tracing::warn;

/// Config keys that are settings, never device names
const RESERVED_KEYS: &[&str] = &[
    "INPUT_DIR",
    "OUTPUT_DIR",
    "POLL_INTERVAL_MS",
    "DEFAULT_BAUDRATE",
    "DEFAULT_TIMEOUT",
    "LUA_DIR",
    "DB_DIR",
    "COMPLETION_TIMEOUT",
    "ROBOT_IP",
    "ROBOT_PORT",
    "XMLRPC_PORT",
    "TCP_PORT",
    "TCP_UPLOAD_PORT",
    "STATE_PORT",
    "RPC_TIMEOUT",
    "DEVICES",
];

/// Default baud rate when neither the command nor the registry names one
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Name → connection target table
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    entries: BTreeMap<String, ConnectTarget>,
    default_baud: u32,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new(default_baud: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            default_baud,
        }
    }

    /// Build the registry from a config file.
    ///
    /// Malformed entries are logged and skipped.
    pub fn from_env(env: &EnvFile) -> Result<Self, ConfigError> {
        let mut registry = Self::new(env.parse_or("DEFAULT_BAUDRATE", DEFAULT_BAUDRATE)?);

        for (name, value) in env.iter() {
            if RESERVED_KEYS.contains(&name) || !value.contains(',') {
                continue;
            }
            match parse_entry(name, value) {
                Ok(target) => registry.insert(name, target),
                Err(e) => warn!("[REGISTRY] Skipping entry: {}", e),
            }
        }

        if let Some(list) = env.get("DEVICES") {
            for item in list.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                match item.split_once(':') {
                    Some((name, port)) if !name.trim().is_empty() && !port.trim().is_empty() => {
                        let target = ConnectTarget::Serial {
                            port: port.trim().to_string(),
                            baud: registry.default_baud,
                        };
                        registry.insert(name.trim(), target);
                    }
                    _ => warn!("[REGISTRY] Skipping DEVICES item {:?}", item),
                }
            }
        }

        Ok(registry)
    }

    /// Add or replace an entry
    pub fn insert(&mut self, name: &str, target: ConnectTarget) {
        self.entries.insert(name.to_string(), target);
    }

    /// Look up a device by name
    pub fn resolve(&self, name: &str) -> Option<&ConnectTarget> {
        self.entries.get(name)
    }

    pub fn default_baud(&self) -> u32 {
        self.default_baud
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered device names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Parse `PORT,BAUD` or `HOST,RPC_PORT,STREAM_PORT`
fn parse_entry(name: &str, value: &str) -> Result<ConnectTarget, ConfigError> {
    let invalid = || ConfigError::InvalidEntry {
        name: name.to_string(),
        value: value.to_string(),
    };
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();

    match parts.as_slice() {
        [port, baud] if !port.is_empty() => Ok(ConnectTarget::Serial {
            port: port.to_string(),
            baud: baud.parse().map_err(|_| invalid())?,
        }),
        [host, rpc_port, stream_port] if !host.is_empty() => Ok(ConnectTarget::Network {
            host: host.to_string(),
            rpc_port: rpc_port.parse().map_err(|_| invalid())?,
            stream_port: stream_port.parse().map_err(|_| invalid())?,
        }),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_and_network_entries() {
        let env = EnvFile::parse(
            "Pump=COM7,115200\nArm2=10.0.0.5,20003,20010\nINPUT_DIR=./in\nDEFAULT_BAUDRATE=9600",
        );
        let registry = ConnectionRegistry::from_env(&env).unwrap();

        assert_eq!(
            registry.resolve("Pump"),
            Some(&ConnectTarget::Serial {
                port: "COM7".into(),
                baud: 115_200
            })
        );
        assert_eq!(
            registry.resolve("Arm2"),
            Some(&ConnectTarget::Network {
                host: "10.0.0.5".into(),
                rpc_port: 20003,
                stream_port: 20010
            })
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.default_baud(), 9600);
    }

    #[test]
    fn test_devices_list_uses_default_baud() {
        let env = EnvFile::parse("DEVICES=IceMaker:COM3; Stirrer:COM4;broken");
        let registry = ConnectionRegistry::from_env(&env).unwrap();

        assert_eq!(
            registry.resolve("Stirrer"),
            Some(&ConnectTarget::Serial {
                port: "COM4".into(),
                baud: DEFAULT_BAUDRATE
            })
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["IceMaker", "Stirrer"]);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let env = EnvFile::parse("Pump=COM7,fast\nOther=,9600\nValve=COM2,9600");
        let registry = ConnectionRegistry::from_env(&env).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("Valve").is_some());
    }
}
