//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::pool::HARD_CAP;

/// Bounds and pacing for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Workers spawned before the first handshake
    pub initial_workers: u32,

    /// Total workers the run may start; reaching it in exits ends the run
    pub hard_cap: u32,

    /// Simulated seconds, and wall-clock seconds, before admission closes
    pub time_limit_secs: u32,

    /// Simulated nanoseconds added per accepted message
    pub quantum_ns: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            initial_workers: 5,
            hard_cap: HARD_CAP,
            time_limit_secs: 2,
            quantum_ns: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Wall-clock bound for the stop timer
    pub fn wall_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs as u64)
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            initial_workers: config.pool.initial_workers,
            hard_cap: config.pool.hard_cap,
            time_limit_secs: config.run.time_limit_secs,
            quantum_ns: config.clock.quantum_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.initial_workers, 5);
        assert_eq!(config.hard_cap, 100);
        assert_eq!(config.time_limit_secs, 2);
        assert_eq!(config.quantum_ns, 100);
    }

    #[test]
    fn test_from_app_config() {
        let mut app = Config::default();
        app.pool.initial_workers = 3;
        app.run.time_limit_secs = 9;
        let config = CoordinatorConfig::from(&app);
        assert_eq!(config.initial_workers, 3);
        assert_eq!(config.wall_limit(), Duration::from_secs(9));
    }
}
