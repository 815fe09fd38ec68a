//! tokenpool configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::clock::NANOS_PER_SEC;
use crate::pool::HARD_CAP;
use crate::worker::WorkerProfile;

/// Main tokenpool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool limits
    pub pool: PoolConfig,

    /// Run bounds
    pub run: RunConfig,

    /// Simulated clock settings
    pub clock: ClockConfig,

    /// Worker program and lifetime
    pub worker: WorkerConfig,

    /// Log output
    pub log: LogConfig,
}

impl Config {
    /// Reject values the run cannot honor
    ///
    /// Call this after CLI overrides are applied so bad flags fail fast too.
    pub fn validate(&self) -> Result<()> {
        if self.pool.hard_cap == 0 || self.pool.hard_cap > HARD_CAP {
            return Err(eyre::eyre!(
                "pool.hard-cap must be between 1 and {}, got {}",
                HARD_CAP,
                self.pool.hard_cap
            ));
        }
        if self.pool.initial_workers == 0 || self.pool.initial_workers > self.pool.hard_cap {
            return Err(eyre::eyre!(
                "Initial workers must be between 1 and {} (the hard cap), got {}",
                self.pool.hard_cap,
                self.pool.initial_workers
            ));
        }
        if self.clock.quantum_ns == 0 || self.clock.quantum_ns >= NANOS_PER_SEC as u64 {
            return Err(eyre::eyre!(
                "clock.quantum-ns must be between 1 and {}, got {}",
                NANOS_PER_SEC - 1,
                self.clock.quantum_ns
            ));
        }
        if self.log.file.as_os_str().is_empty() {
            return Err(eyre::eyre!("log.file must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .tokenpool.yml
        let local_config = PathBuf::from(".tokenpool.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/tokenpool/tokenpool.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tokenpool").join("tokenpool.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::debug!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker pool limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers started before the first handshake
    #[serde(rename = "initial-workers")]
    pub initial_workers: u32,

    /// Workers started over the whole run; the run ends once this many have exited
    #[serde(rename = "hard-cap")]
    pub hard_cap: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 5,
            hard_cap: HARD_CAP,
        }
    }
}

/// Run bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seconds, both of simulated time and of wall-clock time, before admission closes
    #[serde(rename = "time-limit-secs")]
    pub time_limit_secs: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { time_limit_secs: 2 }
    }
}

/// Simulated clock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Nanoseconds added per accepted message
    #[serde(rename = "quantum-ns")]
    pub quantum_ns: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { quantum_ns: 100 }
    }
}

/// Worker program and lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable; defaults to `tp-user` next to the running binary
    pub program: Option<PathBuf>,

    #[serde(flatten)]
    pub profile: WorkerProfile,
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// File the controller and its workers append to
    pub file: PathBuf,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("log.txt"),
            level: None,
        }
    }
}
