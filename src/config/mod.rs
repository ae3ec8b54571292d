use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drivers::dualshock4::calibration::AxisOrdering;


/// Represents all possible errors loading a [SessionConfig]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not read: {0}")]
    IoError(#[from] io::Error),
    #[error("Unable to deserialize: {0}")]
    DeserializeError(#[from] serde_yaml::Error),
}

fn default_keep_alive_interval_ms() -> u64 {
    4000
}

fn default_crc_failure_threshold() -> u32 {
    10
}

fn default_history_size() -> usize {
    64
}

/// Per-connection protocol settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Gyro calibration field order. Has no default: a wrong value silently
    /// produces swapped or mis-scaled gyro axes.
    pub axis_ordering: AxisOrdering,
    /// Longest time without an output report while in full reporting mode
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    /// Consecutive CRC failures that end the session
    #[serde(default = "default_crc_failure_threshold")]
    pub crc_failure_threshold: u32,
    /// Number of protocol transactions kept for diagnostics
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl SessionConfig {
    /// Create a new config with default values and the given axis ordering
    pub fn new(axis_ordering: AxisOrdering) -> Self {
        Self {
            axis_ordering,
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            crc_failure_threshold: default_crc_failure_threshold(),
            history_size: default_history_size(),
        }
    }

    /// Load a [SessionConfig] from the given YAML string
    pub fn from_yaml(content: &str) -> Result<SessionConfig, LoadError> {
        let config: SessionConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Load a [SessionConfig] from the given YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<SessionConfig, LoadError> {
        let file = std::fs::File::open(path)?;
        let config: SessionConfig = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }
}
