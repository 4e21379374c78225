use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::mining::{MiningBudget, MAX_DIFFICULTY};

const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const MINING_TIMEOUT_KEY: &str = "LEDGER_MINING_TIMEOUT_SECS";
const MAX_ATTEMPTS_KEY: &str = "LEDGER_MAX_MINING_ATTEMPTS";
const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const BIND_ADDR_KEY: &str = "LEDGER_BIND_ADDR";

const DEFAULT_DIFFICULTY: u8 = 4;
const DEFAULT_MINING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DATA_DIR: &str = "data/ledger";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Errors raised while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Difficulty {0} exceeds the maximum of {max}", max = MAX_DIFFICULTY)]
    DifficultyTooHigh(u8),
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Leading zero hex characters required in every block hash
    pub difficulty: u8,

    /// How long one append may spend mining
    pub mining_timeout: Duration,

    /// Optional cap on hashes tried per append
    pub max_mining_attempts: Option<u64>,

    /// Directory of the sled database
    pub data_dir: PathBuf,

    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            difficulty: DEFAULT_DIFFICULTY,
            mining_timeout: Duration::from_secs(DEFAULT_MINING_TIMEOUT_SECS),
            max_mining_attempts: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bind_addr: String::from(DEFAULT_BIND_ADDR),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults for
    /// unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(difficulty) = parse(&lookup, DIFFICULTY_KEY)? {
            if difficulty > MAX_DIFFICULTY {
                return Err(ConfigError::DifficultyTooHigh(difficulty));
            }
            config.difficulty = difficulty;
        }

        if let Some(secs) = parse::<u64, _>(&lookup, MINING_TIMEOUT_KEY)? {
            config.mining_timeout = Duration::from_secs(secs);
        }

        config.max_mining_attempts = parse(&lookup, MAX_ATTEMPTS_KEY)?;

        if let Some(data_dir) = lookup(DATA_DIR_KEY) {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Some(bind_addr) = lookup(BIND_ADDR_KEY) {
            config.bind_addr = bind_addr;
        }

        Ok(config)
    }

    /// Mining budget for one append, starting now
    pub fn mining_budget(&self) -> MiningBudget {
        let budget = MiningBudget::unbounded().with_timeout(self.mining_timeout);
        match self.max_mining_attempts {
            Some(max_attempts) => budget.with_max_attempts(max_attempts),
            None => budget,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config_from(&[]).unwrap(), Config::default());
        assert_eq!(Config::default().difficulty, 4);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (DIFFICULTY_KEY, "2"),
            (MINING_TIMEOUT_KEY, " 5 "),
            (MAX_ATTEMPTS_KEY, "1000"),
            (DATA_DIR_KEY, "/tmp/ledger"),
            (BIND_ADDR_KEY, "0.0.0.0:9000"),
        ])
        .unwrap();

        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_timeout, Duration::from_secs(5));
        assert_eq!(config.max_mining_attempts, Some(1000));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            config_from(&[(DIFFICULTY_KEY, "four")]),
            Err(ConfigError::InvalidValue {
                key: DIFFICULTY_KEY,
                value: "four".to_string()
            })
        );
        assert_eq!(
            config_from(&[(DIFFICULTY_KEY, "65")]),
            Err(ConfigError::DifficultyTooHigh(65))
        );
        assert!(config_from(&[(MINING_TIMEOUT_KEY, "-1")]).is_err());
    }
}
