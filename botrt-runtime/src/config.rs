//! Runtime configuration (botrt.yml)

use botrt_script::DEFAULT_ENERGY;
use botrt_types::{DeviceInfo, RealtimeEditMode, VersionInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Settings for a [`crate::BotRuntime`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Step budget for one top-level entry
    #[serde(default = "default_energy")]
    pub energy: u64,

    /// Cap on re-evaluations of one formula within a recalculation pass
    #[serde(default = "default_max_recalculations")]
    pub max_recalculations: u32,

    #[serde(default)]
    pub version: VersionInfo,

    #[serde(default)]
    pub device: DeviceInfo,

    /// Per-space overrides of the default edit modes
    #[serde(default)]
    pub edit_modes: BTreeMap<String, RealtimeEditMode>,
}

fn default_energy() -> u64 {
    DEFAULT_ENERGY
}

fn default_max_recalculations() -> u32 {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            energy: default_energy(),
            max_recalculations: default_max_recalculations(),
            version: VersionInfo::default(),
            device: DeviceInfo::default(),
            edit_modes: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
