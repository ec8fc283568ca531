//! Denomination normalization and token metadata.
//!
//! IBC trace denoms (`transfer/channel-0/uatom`, `ibc/27394F...`) are keyed by
//! their final path segment; metadata for known bases is seeded at startup and
//! can be replaced at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata describing one token denomination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub original_denom: String,
    pub base_denom: String,
    pub symbol: String,
    pub decimals: u32,
    pub coingecko_id: Option<String>,
    pub description: String,
    pub is_stable: bool,
}

/// Strip IBC trace prefixes: the base denom is the last `/`-separated segment.
pub fn parse_base_denom(denom: &str) -> &str {
    match denom.rfind('/') {
        Some(idx) => &denom[idx + 1..],
        None => denom,
    }
}

/// Registry of known token metadata keyed by base denom.
pub struct TokenRegistry {
    tokens: HashMap<String, TokenMetadata>,
}

impl TokenRegistry {
    /// Build a registry seeded with the well-known ecosystem tokens.
    pub fn seeded() -> Self {
        let mut registry = TokenRegistry {
            tokens: HashMap::new(),
        };

        let seed: &[(&str, &str, u32, Option<&str>, &str, bool)] = &[
            ("ubbn", "BABY", 6, Some("babylon"), "Babylon native token", false),
            ("uatom", "ATOM", 6, Some("cosmos"), "Cosmos Hub staking token", false),
            ("uosmo", "OSMO", 6, Some("osmosis"), "Osmosis native token", false),
            ("uusdc", "USDC", 6, Some("usd-coin"), "USD Coin", true),
            ("uusdt", "USDT", 6, Some("tether"), "Tether USD", true),
            ("uluna", "LUNA", 6, Some("terra-luna-2"), "Terra native token", false),
            ("untrn", "NTRN", 6, Some("neutron-3"), "Neutron native token", false),
            ("utia", "TIA", 6, Some("celestia"), "Celestia native token", false),
            ("wbtc", "WBTC", 8, Some("wrapped-bitcoin"), "Wrapped Bitcoin", false),
            ("ustrd", "STRD", 6, Some("stride"), "Stride native token", false),
            ("inj", "INJ", 18, Some("injective-protocol"), "Injective native token", false),
        ];

        for (base, symbol, decimals, gecko, description, stable) in seed {
            registry.register_mapping(TokenMetadata {
                original_denom: base.to_string(),
                base_denom: base.to_string(),
                symbol: symbol.to_string(),
                decimals: *decimals,
                coingecko_id: gecko.map(str::to_string),
                description: description.to_string(),
                is_stable: *stable,
            });
        }

        registry
    }

    /// Add or replace a metadata entry, keyed by its base denom.
    pub fn register_mapping(&mut self, metadata: TokenMetadata) {
        self.tokens.insert(metadata.base_denom.clone(), metadata);
    }

    /// Resolve metadata for a denom. Known bases return the seeded entry
    /// (rekeyed to the original denom); unknown bases synthesize defaults.
    pub fn resolve(&self, denom: &str) -> TokenMetadata {
        let base = parse_base_denom(denom);

        if let Some(known) = self.tokens.get(base) {
            let mut metadata = known.clone();
            metadata.original_denom = denom.to_string();
            return metadata;
        }

        let (symbol, decimals) = default_symbol_and_decimals(base);
        TokenMetadata {
            original_denom: denom.to_string(),
            base_denom: base.to_string(),
            description: format!("Unknown token: {}", symbol),
            symbol,
            decimals,
            coingecko_id: None,
            is_stable: false,
        }
    }

    pub fn known_base(&self, base: &str) -> Option<&TokenMetadata> {
        self.tokens.get(base)
    }

    /// All registered stablecoin coingecko ids.
    pub fn stable_ids(&self) -> Vec<String> {
        self.tokens
            .values()
            .filter(|t| t.is_stable)
            .filter_map(|t| t.coingecko_id.clone())
            .collect()
    }
}

/// Default display symbol and decimals for an unregistered base denom.
///
/// Micro-denoms (`u` prefix) display the remainder upper-cased at 6 decimals;
/// anything mentioning btc gets 8.
fn default_symbol_and_decimals(base: &str) -> (String, u32) {
    let symbol = if base.len() > 1 && base.starts_with('u') {
        base[1..].to_uppercase()
    } else {
        base.to_uppercase()
    };

    let decimals = if base.to_lowercase().contains("btc") {
        8
    } else {
        6
    };

    (symbol, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_denom_strips_trace() {
        assert_eq!(parse_base_denom("transfer/channel-0/uatom"), "uatom");
        assert_eq!(parse_base_denom("transfer/channel-5/transfer/channel-1/uosmo"), "uosmo");
        assert_eq!(parse_base_denom("ubbn"), "ubbn");
    }

    #[test]
    fn test_parse_base_denom_idempotent() {
        for denom in ["transfer/channel-0/uatom", "ubbn", "ibc/ABCDEF", "wbtc"] {
            let once = parse_base_denom(denom);
            assert_eq!(parse_base_denom(once), once);
        }
    }

    #[test]
    fn test_seeded_lookup() {
        let registry = TokenRegistry::seeded();
        let baby = registry.resolve("ubbn");
        assert_eq!(baby.symbol, "BABY");
        assert_eq!(baby.decimals, 6);
        assert!(!baby.is_stable);

        let usdc = registry.resolve("transfer/channel-3/uusdc");
        assert_eq!(usdc.symbol, "USDC");
        assert!(usdc.is_stable);
        assert_eq!(usdc.base_denom, "uusdc");
        assert_eq!(usdc.original_denom, "transfer/channel-3/uusdc");
    }

    #[test]
    fn test_unknown_micro_denom_defaults() {
        let registry = TokenRegistry::seeded();
        let token = registry.resolve("ufoo");
        assert_eq!(token.symbol, "FOO");
        assert_eq!(token.decimals, 6);
        assert_eq!(token.description, "Unknown token: FOO");
        assert!(token.coingecko_id.is_none());
    }

    #[test]
    fn test_btc_denoms_get_eight_decimals() {
        let registry = TokenRegistry::seeded();
        assert_eq!(registry.resolve("wbtc").decimals, 8);
        assert_eq!(registry.resolve("allbtc").decimals, 8);
        assert_eq!(registry.resolve("ubtcx").decimals, 8);
    }

    #[test]
    fn test_bare_u_is_not_a_micro_prefix() {
        let registry = TokenRegistry::seeded();
        let token = registry.resolve("u");
        assert_eq!(token.symbol, "U");
    }

    #[test]
    fn test_register_mapping_replaces() {
        let mut registry = TokenRegistry::seeded();
        registry.register_mapping(TokenMetadata {
            original_denom: "ubbn".to_string(),
            base_denom: "ubbn".to_string(),
            symbol: "BABYLON".to_string(),
            decimals: 9,
            coingecko_id: None,
            description: "Overridden".to_string(),
            is_stable: false,
        });
        let token = registry.resolve("ubbn");
        assert_eq!(token.symbol, "BABYLON");
        assert_eq!(token.decimals, 9);
    }
}
