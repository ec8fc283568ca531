//! Token composition: metadata + price, USD conversion and display
//! formatting.
//!
//! `Token` is a value object. Updates build new instances and the shared
//! cache swaps `Arc`s, so a reader holding an old token never observes
//! mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::denom::{parse_base_denom, TokenMetadata, TokenRegistry};
use crate::price::PriceProvider;
use crate::token_format::scale_amount;
use crate::types::PriceSource;

/// A price observation attached to a token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub price: f64,
    pub last_updated: DateTime<Utc>,
    pub source: PriceSource,
}

/// Immutable token value: metadata plus an optional price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub metadata: TokenMetadata,
    pub price: Option<TokenPrice>,
}

impl Token {
    pub fn from_metadata(metadata: TokenMetadata) -> Self {
        Token {
            metadata,
            price: None,
        }
    }

    /// A copy of this token carrying a new price.
    pub fn with_price(&self, price: f64, source: PriceSource) -> Self {
        Token {
            metadata: self.metadata.clone(),
            price: Some(TokenPrice {
                price,
                last_updated: Utc::now(),
                source,
            }),
        }
    }

    /// A copy of this token carrying replacement metadata.
    pub fn with_metadata(&self, metadata: TokenMetadata) -> Self {
        Token {
            metadata,
            price: self.price,
        }
    }

    pub fn usd_price(&self) -> Option<f64> {
        self.price.map(|p| p.price)
    }

    fn price_is_stale(&self, ttl: Duration) -> bool {
        match self.price {
            Some(p) => {
                let age = Utc::now().signed_duration_since(p.last_updated);
                age.to_std().map(|a| a >= ttl).unwrap_or(true)
            }
            None => true,
        }
    }
}

/// One row of a batch USD conversion, largest value first.
#[derive(Debug, Clone, Serialize)]
pub struct UsdBreakdownRow {
    pub denom: String,
    pub symbol: String,
    pub amount: String,
    pub usd_value: f64,
    pub has_price: bool,
    pub percentage: f64,
}

/// Result of converting a basket of amounts to USD.
#[derive(Debug, Clone, Serialize)]
pub struct UsdBreakdown {
    pub total: f64,
    pub breakdown: Vec<UsdBreakdownRow>,
}

/// Shared token cache + conversion and formatting operations.
pub struct TokenService {
    registry: RwLock<TokenRegistry>,
    provider: Arc<PriceProvider>,
    cache: RwLock<HashMap<String, Arc<Token>>>,
}

impl TokenService {
    pub fn new(registry: TokenRegistry, provider: Arc<PriceProvider>) -> Self {
        TokenService {
            registry: RwLock::new(registry),
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace token metadata; the cached token (if any) is
    /// rebuilt so later readers see the new metadata.
    pub async fn register_mapping(&self, metadata: TokenMetadata) {
        let base = metadata.base_denom.clone();
        {
            let mut registry = self.registry.write().await;
            registry.register_mapping(metadata.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.get(&base) {
            let updated = Arc::new(existing.with_metadata(metadata));
            cache.insert(base, updated);
        }
    }

    /// Resolve a token for a denom: cache first, then metadata + an
    /// opportunistic price fetch.
    pub async fn get_token(&self, denom: &str) -> Arc<Token> {
        let base = parse_base_denom(denom).to_string();

        if let Some(token) = self.cache.read().await.get(&base) {
            return token.clone();
        }

        let metadata = self.registry.read().await.resolve(denom);
        let mut token = Token::from_metadata(metadata);

        if token.metadata.is_stable {
            token = token.with_price(1.0, PriceSource::Hardcoded);
        } else if let Some(id) = token.metadata.coingecko_id.clone() {
            match self.provider.get_price(&id).await {
                Ok(price) if price > 0.0 => {
                    token = token.with_price(price, PriceSource::External);
                }
                Ok(_) => {
                    debug!(denom = %base, "No price available for token");
                }
                Err(e) => {
                    warn!(denom = %base, error = %e, "Price fetch failed, token stays unpriced");
                }
            }
        }

        let token = Arc::new(token);
        self.cache.write().await.insert(base, token.clone());
        token
    }

    /// Refresh every cached token whose price is older than `ttl` with one
    /// batched provider request. Stable tokens are re-pinned to 1.0.
    pub async fn refresh_stale_prices(&self, ttl: Duration) -> usize {
        let stale: Vec<(String, String)> = {
            let cache = self.cache.read().await;
            cache
                .iter()
                .filter(|(_, token)| token.price_is_stale(ttl))
                .filter_map(|(base, token)| {
                    token
                        .metadata
                        .coingecko_id
                        .clone()
                        .map(|id| (base.clone(), id))
                })
                .collect()
        };

        if stale.is_empty() {
            return 0;
        }

        let ids: Vec<String> = stale.iter().map(|(_, id)| id.clone()).collect();
        let prices = match self.provider.get_prices(&ids).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Stale price refresh failed");
                HashMap::new()
            }
        };

        let mut refreshed = 0;
        let mut cache = self.cache.write().await;
        for (base, id) in stale {
            let Some(existing) = cache.get(&base) else {
                continue;
            };
            if existing.metadata.is_stable {
                let updated = Arc::new(existing.with_price(1.0, PriceSource::Hardcoded));
                cache.insert(base, updated);
                refreshed += 1;
                continue;
            }
            if let Some(price) = prices.get(&id) {
                let source = if *price > 0.0 {
                    PriceSource::External
                } else {
                    PriceSource::Fallback
                };
                let updated = Arc::new(existing.with_price(*price, source));
                cache.insert(base, updated);
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Convert a base-unit amount of a denom to USD. None when the token has
    /// no usable price.
    pub async fn convert_to_usd(&self, denom: &str, amount: &str) -> Option<f64> {
        let token = self.get_token(denom).await;
        let price = token.usd_price()?;
        let units: u128 = amount.trim().parse().ok()?;
        // Float is fine here: USD values are display-only.
        let scaled = units as f64 / 10f64.powi(token.metadata.decimals as i32);
        Some(scaled * price)
    }

    /// Convert a basket of `(denom, amount)` pairs, largest USD value first.
    pub async fn convert_batch_to_usd(&self, items: &[(String, String)]) -> UsdBreakdown {
        let mut rows = Vec::with_capacity(items.len());
        let mut total = 0.0;

        for (denom, amount) in items {
            let token = self.get_token(denom).await;
            let usd_value = self.convert_to_usd(denom, amount).await.unwrap_or(0.0);
            total += usd_value;
            rows.push(UsdBreakdownRow {
                denom: denom.clone(),
                symbol: token.metadata.symbol.clone(),
                amount: amount.clone(),
                usd_value,
                has_price: token.usd_price().is_some(),
                percentage: 0.0,
            });
        }

        rows.sort_by(|a, b| {
            b.usd_value
                .partial_cmp(&a.usd_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if total > 0.0 {
            for row in &mut rows {
                row.percentage = row.usd_value / total * 100.0;
            }
        }

        UsdBreakdown {
            total,
            breakdown: rows,
        }
    }

    /// Format a base-unit amount for display: decimal scaling, thousands
    /// grouping, trailing zeros collapsed. Non-zero values below 0.01 render
    /// in scientific notation with two significant digits; zero renders "0".
    pub async fn format_amount(&self, denom: &str, amount: &str) -> String {
        let token = self.get_token(denom).await;
        format_scaled_amount(amount, token.metadata.decimals)
    }

    /// `$` prefix, two decimal places.
    pub fn format_usd(&self, value: f64) -> String {
        format!("${:.2}", value)
    }
}

/// Pure formatting helper behind [`TokenService::format_amount`].
pub fn format_scaled_amount(amount: &str, decimals: u32) -> String {
    let Ok(scaled) = scale_amount(amount, decimals) else {
        return "0".to_string();
    };

    if scaled == "0" {
        return "0".to_string();
    }

    // Display-only float is acceptable for the magnitude check.
    let approx: f64 = scaled.parse().unwrap_or(0.0);
    if approx > 0.0 && approx < 0.01 {
        return format!("{:.1e}", approx);
    }

    let (whole, frac) = match scaled.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (scaled.as_str(), None),
    };

    let grouped = group_thousands(whole);
    match frac {
        Some(f) => format!("{}.{}", grouped, f),
        None => grouped,
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let chars: Vec<char> = digits.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriceConfig, PriceTier};

    fn offline_provider() -> Arc<PriceProvider> {
        // Unroutable address: any network call fails fast, which the stable
        // fallback and unpriced paths must tolerate.
        let config = PriceConfig {
            api_key: None,
            tier: PriceTier::Demo,
            cache_ttl_minutes: 5,
            batch_size: 250,
            max_retries: 0,
        };
        Arc::new(
            PriceProvider::with_base_url(
                &config,
                ["usd-coin".to_string(), "tether".to_string()],
                "http://127.0.0.1:1",
            )
            .unwrap(),
        )
    }

    fn service() -> TokenService {
        TokenService::new(TokenRegistry::seeded(), offline_provider())
    }

    #[tokio::test]
    async fn test_stable_token_prices_one_even_offline() {
        let service = service();
        let usdc = service.get_token("uusdc").await;
        assert_eq!(usdc.usd_price(), Some(1.0));
        assert_eq!(usdc.price.unwrap().source, PriceSource::Hardcoded);
    }

    #[tokio::test]
    async fn test_unpriced_token_when_provider_down() {
        let service = service();
        let baby = service.get_token("ubbn").await;
        assert_eq!(baby.metadata.symbol, "BABY");
        assert!(baby.usd_price().is_none());
    }

    #[tokio::test]
    async fn test_cache_returns_same_instance() {
        let service = service();
        let first = service.get_token("ubbn").await;
        let second = service.get_token("transfer/channel-0/ubbn").await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_token_immutability_under_update() {
        let service = service();
        let before = service.get_token("ubbn").await;
        service
            .register_mapping(TokenMetadata {
                original_denom: "ubbn".to_string(),
                base_denom: "ubbn".to_string(),
                symbol: "BABY2".to_string(),
                decimals: 6,
                coingecko_id: None,
                description: "updated".to_string(),
                is_stable: false,
            })
            .await;
        let after = service.get_token("ubbn").await;
        // The old handle still reads the old metadata.
        assert_eq!(before.metadata.symbol, "BABY");
        assert_eq!(after.metadata.symbol, "BABY2");
    }

    #[tokio::test]
    async fn test_convert_to_usd_stable() {
        let service = service();
        let usd = service.convert_to_usd("uusdc", "2500000").await.unwrap();
        assert!((usd - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_convert_batch_orders_by_value() {
        let service = service();
        let result = service
            .convert_batch_to_usd(&[
                ("ubbn".to_string(), "1000000".to_string()),
                ("uusdc".to_string(), "5000000".to_string()),
                ("uusdt".to_string(), "1000000".to_string()),
            ])
            .await;

        assert!((result.total - 6.0).abs() < 1e-9);
        assert_eq!(result.breakdown[0].symbol, "USDC");
        assert!((result.breakdown[0].percentage - 5.0 / 6.0 * 100.0).abs() < 1e-6);
        // Unpriced BABY sorts last with zero value.
        let last = result.breakdown.last().unwrap();
        assert_eq!(last.symbol, "BABY");
        assert!(!last.has_price);
        assert_eq!(last.usd_value, 0.0);
    }

    #[test]
    fn test_format_scaled_amount_grouping() {
        assert_eq!(format_scaled_amount("1234567000000", 6), "1,234,567");
        assert_eq!(format_scaled_amount("1500000", 6), "1.5");
        assert_eq!(format_scaled_amount("1000000", 6), "1");
    }

    #[test]
    fn test_format_scaled_amount_small_values() {
        assert_eq!(format_scaled_amount("0", 6), "0");
        assert_eq!(format_scaled_amount("1", 6), "1.0e-6");
        assert_eq!(format_scaled_amount("5000", 6), "5.0e-3");
        // 0.01 exactly stays decimal.
        assert_eq!(format_scaled_amount("10000", 6), "0.01");
    }

    #[test]
    fn test_format_usd() {
        let service = service();
        assert_eq!(service.format_usd(1234.5), "$1234.50");
        assert_eq!(service.format_usd(0.0), "$0.00");
    }
}
