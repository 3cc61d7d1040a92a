//! Key=value configuration files
//!
//! ```text
//! # comment
//! INPUT_DIR=./inbox
//! Pump=COM7,115200
//! DEVICES=IceMaker:COM3;Stirrer:COM4
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid registry entry {name}={value:?}")]
    InvalidEntry { name: String, value: String },
}

/// Parsed key=value file
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
    /// Directory relative paths are resolved against
    base_dir: PathBuf,
}

impl EnvFile {
    /// Load a config file. A missing file yields an empty config rooted at its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !path.exists() {
            return Ok(Self {
                entries: BTreeMap::new(),
                base_dir,
            });
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut env = Self::parse(&text);
        env.base_dir = base_dir;
        Ok(env)
    }

    /// Parse config text
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Self {
            entries,
            base_dir: PathBuf::from("."),
        }
    }

    /// Override the directory relative paths resolve against
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// First present key among aliases
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Typed value with a default
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.parse_any_or(&[key], default)
    }

    /// Typed value from the first present alias, with a default
    pub fn parse_any_or<T: FromStr>(&self, keys: &[&str], default: T) -> Result<T, ConfigError> {
        let Some(key) = keys.iter().find(|k| self.get(k).is_some()) else {
            return Ok(default);
        };
        let value = self.get(key).unwrap_or_default();
        value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Duration given in (possibly fractional) seconds
    pub fn seconds_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// Directory value resolved against the base directory
    pub fn dir_or(&self, key: &str, default: &str) -> PathBuf {
        let raw = Path::new(self.get(key).unwrap_or(default));
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.base_dir.join(raw)
        }
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
