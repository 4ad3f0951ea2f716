//! Relayer settings loading
//!
//! Sources, later ones overriding earlier ones:
//! 1. optional config file (format from its extension)
//! 2. `RELAYER__*` environment variables, e.g. `RELAYER__INTERVAL_SECS=30`,
//!    `RELAYER__FEEDS=0xabc...,0xdef...`
//!
//! A `.env` file in the working directory is loaded into the environment first.

use anyhow::Context;
use std::path::Path;
use tracing::info;

use oracle_core::RelayerConfig;

pub const ENV_PREFIX: &str = "RELAYER";

/// Load and validate relayer configuration
pub fn load(path: Option<&Path>) -> anyhow::Result<RelayerConfig> {
    dotenvy::dotenv().ok();

    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("feeds")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read relayer configuration")?;

    let config: RelayerConfig = settings
        .try_deserialize()
        .context("Malformed relayer configuration")?;
    config.validate().context("Invalid relayer configuration")?;

    info!(
        "Loaded configuration: {} pairs, {} feeds, interval {}s",
        config.pairs.len(),
        config.feeds.len(),
        config.interval_secs
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::AssetPair;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir().join(format!("{nanos}-{name}"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = write_temp(
            "relayer.toml",
            r#"
interval_secs = 30
simulate_before_poke = false
feeds = ["0x0101010101010101010101010101010101010101"]

[retry]
max_retries = 1
retry_delay_ms = 10

[[pairs]]
asset_pair = "ETHUSD"
oracle_spread = 0.5
oracle_expiration_secs = 15500
price_expiration_secs = 1800
"#,
        );

        let config = load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.interval_secs, 30);
        assert!(!config.simulate_before_poke);
        assert_eq!(config.retry.max_retries, 1);
        let pair = config.get_pair_config(&AssetPair::new("ETHUSD")).unwrap();
        assert_eq!(pair.oracle_spread, 0.5);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let path = write_temp("empty-feeds.toml", "interval_secs = 30\nfeeds = []\n");
        let result = load(Some(&path));
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
