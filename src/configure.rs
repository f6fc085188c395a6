use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use ethers::types::{Address, U256};
use serde::Deserialize;

use crate::sweep::error::SweepError;

pub const DEFAULT_CONFIG_FILE: &str = "config/config.yaml";

const GWEI: u64 = 1_000_000_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub rpc_url: Option<String>,
    pub recipient: Option<String>,
    pub wallet_file: String,

    pub max_workers: usize,
    pub retry_limit: u32,
    pub retry_cap_seconds: u64,
    pub rpc_timeout_seconds: u64,
    pub tx_delay_seconds: u64,

    pub use_dynamic_fee: bool,
    pub priority_fee_fallback_gwei: u64,
    pub gas_price_override_gwei: u64,
    pub gas_buffer_multiplier: f64,

    pub wait_for_receipt: bool,
    pub receipt_timeout_seconds: u64,
    pub receipt_poll_interval_ms: u64,

    pub dry_run: bool,

    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

pub fn load_config(path: &str) -> Result<SweepConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("wallet_file", "wallets.txt")?
        .set_default("max_workers", 10)?
        .set_default("retry_limit", 3)?
        .set_default("retry_cap_seconds", 30)?
        .set_default("rpc_timeout_seconds", 15)?
        .set_default("tx_delay_seconds", 0)?
        .set_default("use_dynamic_fee", false)?
        .set_default("priority_fee_fallback_gwei", 2)?
        .set_default("gas_price_override_gwei", 0)?
        .set_default("gas_buffer_multiplier", 1.1)?
        .set_default("wait_for_receipt", false)?
        .set_default("receipt_timeout_seconds", 120)?
        .set_default("receipt_poll_interval_ms", 2000)?
        .set_default("dry_run", false)?
        .set_default("log_level", "info")?
        .set_default("log_to_file", true)?
        .set_default("log_file", "log/transfer.log")?
        // Add configuration from a file
        .add_source(File::with_name(path).required(false))
        // Add configuration from environment variables
        .add_source(Environment::with_prefix("SWEEP").try_parsing(true))
        .build()?;

    s.try_deserialize()
}

impl SweepConfig {
    /// Checks the options that cannot be defaulted. Any failure here aborts the run.
    pub fn validate(&self) -> Result<(), SweepError> {
        self.rpc_url()?;
        self.recipient_address()?;
        if self.max_workers == 0 {
            return Err(SweepError::Config("max_workers must be at least 1".to_string()));
        }
        if self.rpc_timeout_seconds == 0 {
            return Err(SweepError::Config("rpc_timeout_seconds must be at least 1".to_string()));
        }
        if self.gas_buffer_multiplier.is_nan() || self.gas_buffer_multiplier < 1.0 {
            return Err(SweepError::Config(format!(
                "gas_buffer_multiplier must be >= 1.0, got {}",
                self.gas_buffer_multiplier
            )));
        }
        // Applied in basis points, so finer multipliers would be silently rounded
        let scaled = self.gas_buffer_multiplier * 10_000.0;
        if (scaled - scaled.round()).abs() > 1e-6 {
            return Err(SweepError::Config(format!(
                "gas_buffer_multiplier allows at most 4 decimal places, got {}",
                self.gas_buffer_multiplier
            )));
        }
        Ok(())
    }

    pub fn rpc_url(&self) -> Result<&str, SweepError> {
        match self.rpc_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(SweepError::Config("rpc_url is required".to_string())),
        }
    }

    pub fn recipient_address(&self) -> Result<Address, SweepError> {
        let raw = self
            .recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SweepError::Config("recipient is required".to_string()))?;
        raw.parse::<Address>()
            .map_err(|e| SweepError::Config(format!("invalid recipient {}: {}", raw, e)))
    }

    /// Fixed legacy gas price in wei, `None` when the node should be asked.
    pub fn gas_price_override_wei(&self) -> Option<U256> {
        match self.gas_price_override_gwei {
            0 => None,
            gwei => Some(gwei_to_wei(gwei)),
        }
    }

    pub fn priority_fee_fallback_wei(&self) -> U256 {
        gwei_to_wei(self.priority_fee_fallback_gwei)
    }

    /// Gas buffer expressed in basis points (1.1 -> 11000).
    pub fn gas_buffer_bps(&self) -> u64 {
        (self.gas_buffer_multiplier * 10_000.0).round().max(10_000.0) as u64
    }

    pub fn retry_cap(&self) -> Duration {
        Duration::from_secs(self.retry_cap_seconds)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn tx_delay(&self) -> Duration {
        Duration::from_secs(self.tx_delay_seconds)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            recipient: None,
            wallet_file: "wallets.txt".to_string(),
            max_workers: 10,
            retry_limit: 3,
            retry_cap_seconds: 30,
            rpc_timeout_seconds: 15,
            tx_delay_seconds: 0,
            use_dynamic_fee: false,
            priority_fee_fallback_gwei: 2,
            gas_price_override_gwei: 0,
            gas_buffer_multiplier: 1.1,
            wait_for_receipt: false,
            receipt_timeout_seconds: 120,
            receipt_poll_interval_ms: 2000,
            dry_run: false,
            log_level: "info".to_string(),
            log_to_file: true,
            log_file: "log/transfer.log".to_string(),
        }
    }
}

pub fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(GWEI)
}
