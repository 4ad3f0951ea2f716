//! Configuration types

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::{AssetPair, ConfigError, ConfigResult};

/// Per asset pair relay thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub asset_pair: AssetPair,
    /// Minimum deviation, in percent, between on-chain and aggregated price
    pub oracle_spread: f64,
    /// Max age of the on-chain price before an update is forced
    pub oracle_expiration_secs: u64,
    /// Max age of a feeder observation before it is discarded
    pub price_expiration_secs: u64,
}

impl PairConfig {
    pub fn new(asset_pair: impl Into<AssetPair>) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            oracle_spread: 1.0,
            oracle_expiration_secs: 3600,
            price_expiration_secs: 1800,
        }
    }

    pub fn oracle_expiration(&self) -> Duration {
        Duration::from_secs(self.oracle_expiration_secs)
    }

    pub fn price_expiration(&self) -> Duration {
        Duration::from_secs(self.price_expiration_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.asset_pair.as_str().is_empty() {
            return Err(ConfigError::Invalid("asset pair name is empty".into()));
        }
        if !self.oracle_spread.is_finite() || self.oracle_spread < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{}: oracle_spread must be a non-negative number, got {}",
                self.asset_pair, self.oracle_spread
            )));
        }
        if self.oracle_expiration_secs == 0 || self.price_expiration_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: expirations must be positive",
                self.asset_pair
            )));
        }
        Ok(())
    }
}

/// Read retry policy for the on-chain median client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
        }
    }
}

/// Complete relayer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    pub interval_secs: u64,
    pub simulate_before_poke: bool,
    /// Feeder allow-list
    pub feeds: Vec<Address>,
    pub pairs: Vec<PairConfig>,
    pub retry: RetryConfig,
    /// Capacity of the event channel handed to callers
    pub event_buffer: usize,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            simulate_before_poke: true,
            feeds: vec![],
            pairs: vec![],
            retry: RetryConfig::default(),
            event_buffer: 1024,
        }
    }
}

impl RelayerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn get_pair_config(&self, asset_pair: &AssetPair) -> Option<&PairConfig> {
        self.pairs.iter().find(|p| &p.asset_pair == asset_pair)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()));
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("feeder allow-list is empty".into()));
        }

        let mut seen = HashSet::new();
        for pair in &self.pairs {
            pair.validate()?;
            if !seen.insert(&pair.asset_pair) {
                return Err(ConfigError::DuplicatePair(pair.asset_pair.to_string()));
            }
        }
        Ok(())
    }
}
