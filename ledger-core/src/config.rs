//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What `close()` does when debits and credits differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancePolicy {
    /// Skip the check
    Off,
    /// Log the imbalance and post anyway
    Warn,
    /// Refuse to post
    Reject,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        BalancePolicy::Warn
    }
}

impl std::str::FromStr for BalancePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(BalancePolicy::Off),
            "warn" => Ok(BalancePolicy::Warn),
            "reject" => Ok(BalancePolicy::Reject),
            other => Err(crate::Error::Config(format!(
                "Unknown balance policy: {}",
                other
            ))),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for the persistent backend; `None` keeps records in memory
    pub data_dir: Option<PathBuf>,

    /// Actor mailbox capacity (bounded for backpressure)
    pub mailbox_capacity: usize,

    /// Debit/credit check applied at close
    pub balance_policy: BalancePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ledger-core".to_string(),
            data_dir: None,
            mailbox_capacity: 1000,
            balance_policy: BalancePolicy::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `LEDGER_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(data_dir));
        }

        if let Ok(capacity) = std::env::var("LEDGER_MAILBOX_CAPACITY") {
            self.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        if let Ok(policy) = std::env::var("LEDGER_BALANCE_POLICY") {
            self.balance_policy = policy.parse()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-core");
        assert!(config.data_dir.is_none());
        assert_eq!(config.balance_policy, BalancePolicy::Warn);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str("balance_policy = \"reject\"").unwrap();
        assert_eq!(config.balance_policy, BalancePolicy::Reject);
        assert_eq!(config.mailbox_capacity, 1000);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("OFF".parse::<BalancePolicy>().unwrap(), BalancePolicy::Off);
        assert!("strict".parse::<BalancePolicy>().is_err());
    }
}
