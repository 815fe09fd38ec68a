//! CLI definition and config overrides

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;

/// tokenpool - bounded worker pool driven by a token-passing shared clock
#[derive(Debug, Parser)]
#[command(
    name = "tp",
    about = "Simulate a bounded worker pool coordinated by a token-passing shared clock",
    version,
    after_help = "Logs are written to the configured log file (default: log.txt)"
)]
pub struct Cli {
    /// Path to config file
    #[arg(long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Workers started before the first handshake
    #[arg(short = 'c', value_name = "COUNT", help = "Number of initial workers (default 5)")]
    pub initial_workers: Option<u32>,

    /// Simulated and wall-clock seconds before admission closes
    #[arg(short = 't', value_name = "SECONDS", help = "Time limit in seconds (default 2)")]
    pub time_limit: Option<u32>,

    /// Log file shared by the controller and its workers
    #[arg(short = 'l', value_name = "FILE", help = "Log file (default log.txt)")]
    pub log_file: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long = "log-level", help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    /// Run workers as tasks in this process instead of child processes
    #[arg(long, help = "Run workers in-process instead of as child processes")]
    pub simulate: bool,

    /// Seed for reproducible worker lifetimes
    #[arg(long, help = "Seed for worker lifetimes")]
    pub seed: Option<u64>,

    /// Print the run report as JSON instead of a summary line
    #[arg(long, help = "Print the run report as JSON")]
    pub json: bool,
}

impl Cli {
    /// Overlay command-line values on a loaded config
    pub fn apply(&self, config: &mut Config) {
        debug!(?self, "Cli::apply: called");
        if let Some(count) = self.initial_workers {
            config.pool.initial_workers = count;
        }
        if let Some(secs) = self.time_limit {
            config.run.time_limit_secs = secs;
        }
        if let Some(file) = &self.log_file {
            config.log.file = file.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = Some(level.clone());
        }
        if let Some(seed) = self.seed {
            config.worker.profile.seed = Some(seed);
        }
    }
}
