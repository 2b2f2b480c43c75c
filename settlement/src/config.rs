//! Configuration for the settlement engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Transfer initiation and fee policy
    pub transfer: TransferConfig,

    /// Background task queue
    pub outbox: OutboxConfig,

    /// Expiry reaper
    pub reaper: ReaperConfig,

    /// Logging
    pub telemetry: TelemetryConfig,

    /// Embedded ledger configuration
    pub ledger: ledger_core::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            transfer: TransferConfig::default(),
            outbox: OutboxConfig::default(),
            reaper: ReaperConfig::default(),
            telemetry: TelemetryConfig::default(),
            ledger: ledger_core::Config::default(),
        }
    }
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Authorization window after creation (default: 15 minutes)
    pub authorization_window_mins: i64,

    /// Flat fee charged on wallet-to-wallet transfers inside the platform
    pub internal_flat_fee: Decimal,

    /// Flat fee charged when the platform itself is the recipient
    pub platform_sink_fee: Decimal,

    /// Sentinel address that designates the platform collection account
    pub platform_address: String,

    /// On-chain address that receives off-ramp funding from user wallets.
    /// When unset the funding settles on the platform collection account.
    pub offramp_collection_address: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            authorization_window_mins: 15,
            internal_flat_fee: Decimal::ZERO,
            platform_sink_fee: Decimal::new(1, 2), // 0.01
            platform_address: "platform".to_string(),
            offramp_collection_address: None,
        }
    }
}

/// Outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Attempts before a task is dead-lettered
    pub max_attempts: u32,

    /// First retry delay in milliseconds
    pub base_backoff_ms: u64,

    /// Retry delay ceiling in milliseconds
    pub max_backoff_ms: u64,

    /// Worker poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 1000,
            max_backoff_ms: 64_000,
            poll_interval_ms: 500,
        }
    }
}

/// Reaper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Run the reaper loop
    pub enabled: bool,

    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
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

    /// Apply `SETTLEMENT_*` and `LEDGER_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.ledger.apply_env()?;

        if let Ok(mins) = std::env::var("SETTLEMENT_AUTH_WINDOW_MINS") {
            self.transfer.authorization_window_mins = parse_var("SETTLEMENT_AUTH_WINDOW_MINS", &mins)?;
        }

        if let Ok(fee) = std::env::var("SETTLEMENT_INTERNAL_FEE") {
            self.transfer.internal_flat_fee = parse_var("SETTLEMENT_INTERNAL_FEE", &fee)?;
        }

        if let Ok(fee) = std::env::var("SETTLEMENT_PLATFORM_FEE") {
            self.transfer.platform_sink_fee = parse_var("SETTLEMENT_PLATFORM_FEE", &fee)?;
        }

        if let Ok(address) = std::env::var("SETTLEMENT_PLATFORM_ADDRESS") {
            self.transfer.platform_address = address;
        }

        if let Ok(address) = std::env::var("SETTLEMENT_OFFRAMP_COLLECTION_ADDRESS") {
            self.transfer.offramp_collection_address = Some(address).filter(|a| !a.trim().is_empty());
        }

        if let Ok(attempts) = std::env::var("SETTLEMENT_OUTBOX_MAX_ATTEMPTS") {
            self.outbox.max_attempts = parse_var("SETTLEMENT_OUTBOX_MAX_ATTEMPTS", &attempts)?;
        }

        if let Ok(enabled) = std::env::var("SETTLEMENT_REAPER_ENABLED") {
            self.reaper.enabled = parse_var("SETTLEMENT_REAPER_ENABLED", &enabled)?;
        }

        if let Ok(filter) = std::env::var("SETTLEMENT_LOG") {
            self.telemetry.filter = filter;
        }

        if let Ok(json) = std::env::var("SETTLEMENT_LOG_JSON") {
            self.telemetry.json = parse_var("SETTLEMENT_LOG_JSON", &json)?;
        }

        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transfer.authorization_window_mins, 15);
        assert_eq!(config.transfer.platform_sink_fee, dec!(0.01));
        assert_eq!(config.transfer.internal_flat_fee, Decimal::ZERO);
        assert_eq!(config.outbox.max_attempts, 8);
        assert!(config.reaper.enabled);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [transfer]
            internal_flat_fee = "0.5"

            [ledger]
            balance_policy = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.internal_flat_fee, dec!(0.5));
        assert_eq!(config.transfer.platform_address, "platform");
        assert!(config.transfer.offramp_collection_address.is_none());
        assert_eq!(config.ledger.balance_policy, ledger_core::BalancePolicy::Reject);
        assert_eq!(config.outbox.base_backoff_ms, 1000);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settlement.toml");
        std::fs::write(&path, "service_name = \"rail\"\n[reaper]\nenabled = false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.service_name, "rail");
        assert!(!config.reaper.enabled);

        std::fs::write(&path, "reaper = 3").unwrap();
        assert!(matches!(Config::from_file(&path), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var::<u32>("X", "3").unwrap(), 3);
        assert!(parse_var::<u32>("X", "three").is_err());
    }
}
