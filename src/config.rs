//! YAML harness configuration.
//!
//! Everything here has a sensible default, so the suite runs with no
//! config file at all; a file only needs the keys it wants to change.
//!
//! ```yaml
//! simulator:
//!   binary: ngspice
//!   timeout_secs: 60
//!   keep_artifacts: true
//!
//! suite:
//!   output_dir: results/amp_validation_suite
//!   workers: 4
//!   drive_levels: [0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
//!
//! tuning:
//!   mode: random
//!   samples: 32
//!   seed: 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scenarios::thd_drive_levels;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// How to reach and supervise the external simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Keep per-scenario decks, logs and raw waveforms for post-mortems.
    #[serde(default)]
    pub keep_artifacts: bool,
}

/// Battery and sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "thd_drive_levels")]
    pub drive_levels: Vec<f64>,
}

/// Candidate search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default)]
    pub mode: SearchMode,
    /// Draw count for the random mode; the grid ignores it.
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Grid,
    Random,
}

fn default_binary() -> String {
    "ngspice".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results/amp_validation_suite")
}

fn default_workers() -> usize {
    4
}

fn default_samples() -> usize {
    32
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_secs: default_timeout_secs(),
            keep_artifacts: false,
        }
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: default_workers(),
            drive_levels: thd_drive_levels(),
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            samples: default_samples(),
            seed: 0,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            suite: SuiteConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.simulator.timeout_secs)
    }
}
