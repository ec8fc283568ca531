//! Static chain-id → display-name registry.

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref CHAIN_NAMES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("bbn-1", "Babylon");
        m.insert("bbn-test-5", "Babylon Testnet");
        m.insert("cosmoshub-4", "Cosmos Hub");
        m.insert("osmosis-1", "Osmosis");
        m.insert("osmo-test-5", "Osmosis Testnet");
        m.insert("noble-1", "Noble");
        m.insert("grand-1", "Noble Testnet");
        m.insert("axelar-dojo-1", "Axelar");
        m.insert("neutron-1", "Neutron");
        m.insert("stride-1", "Stride");
        m.insert("injective-1", "Injective");
        m.insert("celestia", "Celestia");
        m.insert("dydx-mainnet-1", "dYdX");
        m.insert("stargaze-1", "Stargaze");
        m.insert("juno-1", "Juno");
        m.insert("akashnet-2", "Akash");
        m.insert("kava_2222-10", "Kava");
        m.insert("secret-4", "Secret");
        m.insert("phoenix-1", "Terra");
        m.insert("columbus-5", "Terra Classic");
        m
    };
}

/// Resolve a chain id to its display name. Unknown ids are returned unchanged.
pub fn resolve(chain_id: &str) -> &str {
    CHAIN_NAMES.get(chain_id).copied().unwrap_or(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_chain() {
        assert_eq!(resolve("osmosis-1"), "Osmosis");
        assert_eq!(resolve("cosmoshub-4"), "Cosmos Hub");
        assert_eq!(resolve("bbn-1"), "Babylon");
    }

    #[test]
    fn test_resolve_unknown_chain_passes_through() {
        assert_eq!(resolve("unknown-chain-9"), "unknown-chain-9");
        assert_eq!(resolve(""), "");
    }
}
