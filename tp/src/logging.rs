//! Log file setup shared by `tp` and `tp-user`

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use tracing::{debug, info};

/// Parse a level name, falling back to INFO for anything unrecognized
pub fn parse_level(level: Option<&str>) -> tracing::Level {
    match level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    }
}

/// Send tracing output to `path`
///
/// The controller truncates the file at the start of a run; workers pass
/// `append` so their lines land after the controller's.
pub fn init(path: &Path, level: Option<&str>, append: bool) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    if !append {
        fs::File::create(path).context(format!("Failed to create log file {}", path.display()))?;
    }
    // Always append so lines from concurrent writers never overwrite each other
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open log file {}", path.display()))?;

    let level = parse_level(level);
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install log subscriber: {}", e))?;

    debug!(path = %path.display(), "logging::init: subscriber installed");
    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), tracing::Level::DEBUG);
        assert_eq!(parse_level(Some("Warning")), tracing::Level::WARN);
        assert_eq!(parse_level(Some("loud")), tracing::Level::INFO);
        assert_eq!(parse_level(None), tracing::Level::INFO);
    }
}
