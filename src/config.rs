use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;

use crate::types::Network;

/// Main configuration for the indexer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub price: PriceConfig,
    pub local_chain: LocalChainConfig,
    pub remote_rpc: RemoteRpcConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Event ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// LCD endpoint of the local chain
    pub lcd_url: String,
    /// Networks to index (each gets its own worker)
    pub networks: Vec<Network>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Price provider tier; selects base URL and auth header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Demo,
    Pro,
}

/// External price provider configuration
#[derive(Clone, Deserialize)]
pub struct PriceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_price_tier")]
    pub tier: PriceTier,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Custom Debug that redacts the API key to prevent accidental log leakage.
impl fmt::Debug for PriceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("tier", &self.tier)
            .field("cache_ttl_minutes", &self.cache_ttl_minutes)
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Local chain identity per network
#[derive(Debug, Clone, Deserialize)]
pub struct LocalChainConfig {
    #[serde(default = "default_mainnet_id")]
    pub mainnet_id: String,
    #[serde(default = "default_testnet_id")]
    pub testnet_id: String,
}

impl LocalChainConfig {
    pub fn chain_id(&self, network: Network) -> &str {
        match network {
            Network::Mainnet => &self.mainnet_id,
            Network::Testnet => &self.testnet_id,
        }
    }
}

impl Default for LocalChainConfig {
    fn default() -> Self {
        Self {
            mainnet_id: default_mainnet_id(),
            testnet_id: default_testnet_id(),
        }
    }
}

/// Remote chain RPC configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRpcConfig {
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_price_tier() -> PriceTier {
    PriceTier::Demo
}

fn default_cache_ttl_minutes() -> u64 {
    5
}

fn default_batch_size() -> usize {
    250
}

fn default_max_retries() -> u32 {
    3
}

fn default_mainnet_id() -> String {
    "bbn-1".to_string()
}

fn default_testnet_id() -> String {
    "bbn-test-5".to_string()
}

fn default_remote_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads .env file if present, then reads from environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let networks = match env::var("NETWORKS") {
            Ok(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Network::parse)
                .collect::<Result<Vec<_>>>()?,
            Err(_) => vec![Network::Mainnet],
        };

        let ingest = IngestConfig {
            lcd_url: env::var("LOCAL_LCD_URL")
                .map_err(|_| eyre!("LOCAL_LCD_URL environment variable is required"))?,
            networks,
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_poll_interval()),
        };

        let tier = match env::var("PRICE_API_TIER").ok().as_deref() {
            Some("pro") => PriceTier::Pro,
            Some("demo") | None => PriceTier::Demo,
            Some(other) => return Err(eyre!("PRICE_API_TIER must be demo or pro, got {}", other)),
        };

        let price = PriceConfig {
            api_key: env::var("PRICE_API_KEY").ok().filter(|k| !k.is_empty()),
            tier,
            cache_ttl_minutes: env::var("PRICE_CACHE_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_cache_ttl_minutes()),
            batch_size: env::var("PRICE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_batch_size()),
            max_retries: env::var("PRICE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_max_retries()),
        };

        let local_chain = LocalChainConfig {
            mainnet_id: env::var("LOCAL_CHAIN_MAINNET_ID").unwrap_or_else(|_| default_mainnet_id()),
            testnet_id: env::var("LOCAL_CHAIN_TESTNET_ID").unwrap_or_else(|_| default_testnet_id()),
        };

        let remote_rpc = RemoteRpcConfig {
            timeout_seconds: env::var("REMOTE_RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_remote_timeout()),
        };

        let config = Config {
            database,
            ingest,
            price,
            local_chain,
            remote_rpc,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.ingest.lcd_url.is_empty() {
            return Err(eyre!("ingest.lcd_url cannot be empty"));
        }

        if self.ingest.networks.is_empty() {
            return Err(eyre!("at least one network must be configured"));
        }

        let mut seen = Vec::new();
        for network in &self.ingest.networks {
            if seen.contains(network) {
                return Err(eyre!(
                    "network {} appears twice in NETWORKS; duplicate workers race on the ingest cursor",
                    network
                ));
            }
            seen.push(*network);
        }

        if self.price.batch_size == 0 {
            return Err(eyre!("price.batch_size cannot be zero"));
        }

        if self.local_chain.mainnet_id.is_empty() || self.local_chain.testnet_id.is_empty() {
            return Err(eyre!("local chain ids cannot be empty"));
        }

        if self.remote_rpc.timeout_seconds == 0 {
            return Err(eyre!("remote_rpc.timeout_seconds cannot be zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
            },
            ingest: IngestConfig {
                lcd_url: "http://localhost:1317".to_string(),
                networks: vec![Network::Mainnet],
                poll_interval_ms: 1000,
            },
            price: PriceConfig {
                api_key: None,
                tier: PriceTier::Demo,
                cache_ttl_minutes: 5,
                batch_size: 250,
                max_retries: 3,
            },
            local_chain: LocalChainConfig::default(),
            remote_rpc: RemoteRpcConfig {
                timeout_seconds: 30,
            },
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_poll_interval(), 1000);
        assert_eq!(default_cache_ttl_minutes(), 5);
        assert_eq!(default_batch_size(), 250);
        assert_eq!(default_max_retries(), 3);
        assert_eq!(default_mainnet_id(), "bbn-1");
        assert_eq!(default_testnet_id(), "bbn-test-5");
        assert_eq!(default_remote_timeout(), 30);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_empty_lcd_url_rejected() {
        let mut config = base_config();
        config.ingest.lcd_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_network_rejected() {
        let mut config = base_config();
        config.ingest.networks = vec![Network::Mainnet, Network::Mainnet];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = base_config();
        config.price.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_chain_lookup() {
        let local = LocalChainConfig::default();
        assert_eq!(local.chain_id(Network::Mainnet), "bbn-1");
        assert_eq!(local.chain_id(Network::Testnet), "bbn-test-5");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = base_config();
        let db = format!("{:?}", config.database);
        assert!(db.contains("<redacted>"));
        assert!(!db.contains("postgres://"));

        let mut price = config.price.clone();
        price.api_key = Some("CG-secret".to_string());
        let out = format!("{:?}", price);
        assert!(!out.contains("CG-secret"));
    }
}
