//! Environment handed from the controller to worker processes

use std::path::PathBuf;

use eyre::{Context, Result, eyre};

use super::WorkerProfile;

pub const SOCKET_VAR: &str = "TOKENPOOL_SOCKET";
pub const CLOCK_VAR: &str = "TOKENPOOL_CLOCK";
pub const LOG_FILE_VAR: &str = "TOKENPOOL_LOG_FILE";
pub const LOG_LEVEL_VAR: &str = "TOKENPOOL_LOG_LEVEL";
pub const MAX_LIFETIME_VAR: &str = "TOKENPOOL_MAX_LIFETIME_NS";
pub const SEED_VAR: &str = "TOKENPOOL_SEED";

/// Everything a `tp-user` process needs to join a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub socket: PathBuf,
    pub clock: String,
    pub log_file: PathBuf,
    pub log_level: String,
    pub profile: WorkerProfile,
}

impl WorkerEnv {
    /// Variables to set on each child
    pub fn to_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (SOCKET_VAR.to_string(), self.socket.display().to_string()),
            (CLOCK_VAR.to_string(), self.clock.clone()),
            (LOG_FILE_VAR.to_string(), self.log_file.display().to_string()),
            (LOG_LEVEL_VAR.to_string(), self.log_level.clone()),
            (MAX_LIFETIME_VAR.to_string(), self.profile.max_lifetime_ns.to_string()),
        ];
        if let Some(seed) = self.profile.seed {
            vars.push((SEED_VAR.to_string(), seed.to_string()));
        }
        vars
    }

    /// Read the variables from this process's environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| lookup(key).ok_or_else(|| eyre!("{} is not set; tp-user is started by tp", key));

        let max_lifetime_ns = match lookup(MAX_LIFETIME_VAR) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid {}: {}", MAX_LIFETIME_VAR, raw))?,
            None => WorkerProfile::default().max_lifetime_ns,
        };
        let seed = lookup(SEED_VAR)
            .map(|raw| raw.parse().with_context(|| format!("Invalid {}: {}", SEED_VAR, raw)))
            .transpose()?;

        Ok(Self {
            socket: PathBuf::from(required(SOCKET_VAR)?),
            clock: required(CLOCK_VAR)?,
            log_file: PathBuf::from(required(LOG_FILE_VAR)?),
            log_level: lookup(LOG_LEVEL_VAR).unwrap_or_else(|| "info".to_string()),
            profile: WorkerProfile { max_lifetime_ns, seed },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> WorkerEnv {
        WorkerEnv {
            socket: PathBuf::from("/tmp/tokenpool-1.sock"),
            clock: "/tokenpool-1-clock".to_string(),
            log_file: PathBuf::from("log.txt"),
            log_level: "debug".to_string(),
            profile: WorkerProfile {
                max_lifetime_ns: 2_000,
                seed: Some(9),
            },
        }
    }

    #[test]
    fn test_vars_read_back() {
        let env = sample();
        let vars: HashMap<String, String> = env.to_vars().into_iter().collect();
        let parsed = WorkerEnv::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_seed_is_optional() {
        let mut env = sample();
        env.profile.seed = None;
        let vars: HashMap<String, String> = env.to_vars().into_iter().collect();
        assert!(!vars.contains_key(SEED_VAR));
        assert_eq!(WorkerEnv::from_lookup(|key| vars.get(key).cloned()).unwrap().profile.seed, None);
    }

    #[test]
    fn test_missing_socket_is_an_error() {
        let err = WorkerEnv::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains(SOCKET_VAR));
    }

    #[test]
    fn test_bad_lifetime_is_an_error() {
        let mut vars: HashMap<String, String> = sample().to_vars().into_iter().collect();
        vars.insert(MAX_LIFETIME_VAR.to_string(), "soon".to_string());
        assert!(WorkerEnv::from_lookup(|key| vars.get(key).cloned()).is_err());
    }
}
