//! External USD price provider.
//!
//! Wraps the `/simple/price` endpoint with a TTL cache, a minimum-interval
//! rate limiter, ≤`batch_size` request batching and 429 backoff. Stablecoins
//! short-circuit to 1.0 and never touch the network.

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::{PriceConfig, PriceTier};
use crate::metrics;

const DEMO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PRO_BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";

/// Request timeout for price calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off applied when the provider returns 429.
const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price: f64,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    fn age_ratio(&self) -> f64 {
        self.fetched_at.elapsed().as_secs_f64() / self.ttl.as_secs_f64().max(f64::EPSILON)
    }
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    usd: Option<f64>,
    #[allow(dead_code)]
    last_updated_at: Option<i64>,
}

/// Cached, rate-limited price client.
pub struct PriceProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tier: PriceTier,
    ttl: Duration,
    batch_size: usize,
    rate_limit_backoff: Duration,
    /// Minimum gap between outbound requests, from the tier's per-minute cap
    min_request_interval: Duration,
    stable_ids: HashSet<String>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// Monotonic cursor: the earliest instant the next request may start
    next_request_at: Mutex<Option<Instant>>,
}

impl PriceProvider {
    pub fn new(config: &PriceConfig, stable_ids: impl IntoIterator<Item = String>) -> Result<Self> {
        let base_url = match config.tier {
            PriceTier::Demo => DEMO_BASE_URL,
            PriceTier::Pro => PRO_BASE_URL,
        };
        Self::with_base_url(config, stable_ids, base_url)
    }

    /// Construct against an explicit base URL (tests point this at a mock).
    pub fn with_base_url(
        config: &PriceConfig,
        stable_ids: impl IntoIterator<Item = String>,
        base_url: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("Failed to build HTTP client for price provider")?;

        let requests_per_minute: u64 = match (&config.api_key, config.tier) {
            (None, _) => 10,
            (Some(_), PriceTier::Demo) => 50,
            (Some(_), PriceTier::Pro) => 100,
        };

        Ok(PriceProvider {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            tier: config.tier,
            ttl: Duration::from_secs(config.cache_ttl_minutes * 60),
            batch_size: config.batch_size,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            min_request_interval: Duration::from_millis(60_000 / requests_per_minute),
            stable_ids: stable_ids.into_iter().collect(),
            cache: Mutex::new(HashMap::new()),
            next_request_at: Mutex::new(None),
        })
    }

    #[cfg(test)]
    fn set_rate_limit_backoff(&mut self, backoff: Duration) {
        self.rate_limit_backoff = backoff;
    }

    pub fn cache_ttl(&self) -> Duration {
        self.ttl
    }

    /// USD price for one id.
    pub async fn get_price(&self, id: &str) -> Result<f64> {
        let prices = self.get_prices(&[id.to_string()]).await?;
        Ok(prices.get(id).copied().unwrap_or(0.0))
    }

    /// USD prices for a set of ids, batched ≤ `batch_size` per request.
    pub async fn get_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>> {
        let mut result = HashMap::new();
        let mut to_fetch: Vec<String> = Vec::new();

        {
            let mut cache = self.cache.lock().await;
            for id in ids {
                if self.stable_ids.contains(id) {
                    result.insert(id.clone(), 1.0);
                    continue;
                }
                match cache.get(id) {
                    Some(entry) if entry.is_fresh() => {
                        result.insert(id.clone(), entry.price);
                    }
                    Some(_) => {
                        cache.remove(id);
                        to_fetch.push(id.clone());
                    }
                    None => to_fetch.push(id.clone()),
                }
            }
        }

        to_fetch.sort();
        to_fetch.dedup();

        for batch in to_fetch.chunks(self.batch_size) {
            let fetched = self.fetch_batch(batch).await?;
            result.extend(fetched);
        }

        Ok(result)
    }

    /// Fetch one batch from the provider, respecting the rate limiter.
    /// Transient failures (network, 5xx) are logged and surfaced as-is;
    /// retrying is the caller's decision.
    async fn fetch_batch(&self, ids: &[String]) -> Result<HashMap<String, f64>> {
        match self.fetch_batch_once(ids).await {
            Ok(prices) => Ok(prices),
            Err(FetchError::Transient(e)) => {
                warn!(error = %e, "Transient price fetch failure");
                Err(e)
            }
            Err(FetchError::Fatal(e)) => Err(e),
            Err(FetchError::Resolved(prices)) => Ok(prices),
        }
    }

    async fn fetch_batch_once(
        &self,
        ids: &[String],
    ) -> std::result::Result<HashMap<String, f64>, FetchError> {
        self.wait_for_rate_limit().await;

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_last_updated_at=true",
            self.base_url,
            ids.join(",")
        );

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            let header = match self.tier {
                PriceTier::Demo => "x-cg-demo-api-key",
                PriceTier::Pro => "x-cg-pro-api-key",
            };
            request = request.header(header, key);
        }

        metrics::record_price_request();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                metrics::record_price_failure("network");
                return Err(FetchError::Transient(
                    eyre::Report::from(e).wrap_err("Price request failed"),
                ));
            }
        };

        let status = response.status();
        match status.as_u16() {
            200 => {}
            429 => {
                metrics::record_price_failure("rate_limited");
                warn!(
                    backoff_secs = self.rate_limit_backoff.as_secs(),
                    "Price provider rate limited, backing off"
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
                return Err(FetchError::Fatal(eyre!(
                    "Price provider returned 429 for {} ids",
                    ids.len()
                )));
            }
            403 => {
                metrics::record_price_failure("forbidden");
                error!("Price provider rejected credentials (403)");
                return Err(FetchError::Fatal(eyre!("Price provider returned 403")));
            }
            400 => {
                metrics::record_price_failure("bad_request");
                warn!(ids = ?ids, "Price provider rejected ids (400), caching zeros");
                return Err(FetchError::Resolved(self.cache_zeros(ids).await));
            }
            code if code >= 500 => {
                metrics::record_price_failure("server_error");
                return Err(FetchError::Transient(eyre!(
                    "Price provider returned {}",
                    code
                )));
            }
            code => {
                metrics::record_price_failure("unexpected_status");
                warn!(status = code, "Unexpected price provider status, caching zeros");
                return Err(FetchError::Resolved(self.cache_zeros(ids).await));
            }
        }

        let body: HashMap<String, PriceEntry> = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                metrics::record_price_failure("bad_payload");
                warn!(error = %e, "Unparseable price payload, caching zeros");
                return Err(FetchError::Resolved(self.cache_zeros(ids).await));
            }
        };

        let mut prices = HashMap::new();
        let mut cache = self.cache.lock().await;
        for id in ids {
            // Ids the provider does not know come back absent; cache 0 to
            // suppress refetch until the TTL expires.
            let price = body.get(id).and_then(|e| e.usd).unwrap_or(0.0);
            cache.insert(
                id.clone(),
                CacheEntry {
                    price,
                    fetched_at: Instant::now(),
                    ttl: self.ttl,
                },
            );
            prices.insert(id.clone(), price);
        }

        Ok(prices)
    }

    async fn cache_zeros(&self, ids: &[String]) -> HashMap<String, f64> {
        let mut cache = self.cache.lock().await;
        let mut prices = HashMap::new();
        for id in ids {
            cache.insert(
                id.clone(),
                CacheEntry {
                    price: 0.0,
                    fetched_at: Instant::now(),
                    ttl: self.ttl,
                },
            );
            prices.insert(id.clone(), 0.0);
        }
        prices
    }

    /// Suspend until the minimum inter-request interval has elapsed.
    async fn wait_for_rate_limit(&self) {
        let wait = {
            let mut next = self.next_request_at.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(start + self.min_request_interval);
            start.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter pacing price request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Periodic diagnostics pass: every half-TTL, log cache entries at ≥80%
    /// of their age. Refreshing is caller-driven through the token service.
    pub async fn run_refresh_loop(&self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        let tick = self.ttl / 2;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.recv() => {
                    debug!("Price refresh loop shutting down");
                    return;
                }
            }

            let cache = self.cache.lock().await;
            let aging: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.age_ratio() >= 0.8)
                .map(|(id, _)| id.clone())
                .collect();
            if !aging.is_empty() {
                debug!(count = aging.len(), ids = ?aging, "Price cache entries nearing expiry");
            }
        }
    }

    /// Ids currently cached with a stale entry (test and service introspection).
    pub async fn stale_ids(&self) -> Vec<String> {
        let cache = self.cache.lock().await;
        cache
            .iter()
            .filter(|(_, entry)| !entry.is_fresh())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

enum FetchError {
    /// Network or 5xx failure; surfaced for caller-level retry
    Transient(eyre::Report),
    /// Surface to the caller (429 after backoff, 403)
    Fatal(eyre::Report),
    /// Handled by caching fallback zeros
    Resolved(HashMap<String, f64>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PriceConfig {
        PriceConfig {
            api_key: None,
            tier: PriceTier::Demo,
            cache_ttl_minutes: 5,
            batch_size: 250,
            max_retries: 0,
        }
    }

    fn provider(base_url: &str) -> PriceProvider {
        PriceProvider::with_base_url(
            &test_config(),
            ["usd-coin".to_string(), "tether".to_string()],
            base_url,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_stablecoin_fast_path_skips_network() {
        // No mock server mounted: any network call would error.
        let provider = provider("http://127.0.0.1:1");
        assert_eq!(provider.get_price("usd-coin").await.unwrap(), 1.0);
        assert_eq!(provider.get_price("tether").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"babylon":{"usd":0.065,"last_updated_at":1700000000}}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = provider(&server.url());
        assert_eq!(provider.get_price("babylon").await.unwrap(), 0.065);
        // Second lookup is served from cache: the mock allows one hit only.
        assert_eq!(provider.get_price("babylon").await.unwrap(), 0.065);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_id_caches_zero() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = provider(&server.url());
        assert_eq!(provider.get_price("no-such-coin").await.unwrap(), 0.0);
        assert_eq!(provider.get_price("no-such-coin").await.unwrap(), 0.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bad_request_caches_zero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(400)
            .with_body("bad id")
            .expect(1)
            .create_async()
            .await;

        let provider = provider(&server.url());
        assert_eq!(provider.get_price("bogus!id").await.unwrap(), 0.0);
        // Cached: no second request issued.
        assert_eq!(provider.get_price("bogus!id").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_rate_limited_surfaces_after_backoff() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let mut provider = provider(&server.url());
        provider.set_rate_limit_backoff(Duration::from_millis(10));
        let err = provider.get_price("babylon").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_forbidden_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let provider = provider(&server.url());
        let err = provider.get_price("babylon").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_get_prices_mixes_stable_and_fetched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"babylon":{"usd":0.05},"cosmos":{"usd":9.5}}"#)
            .create_async()
            .await;

        let provider = provider(&server.url());
        let prices = provider
            .get_prices(&[
                "usd-coin".to_string(),
                "babylon".to_string(),
                "cosmos".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(prices["usd-coin"], 1.0);
        assert_eq!(prices["babylon"], 0.05);
        assert_eq!(prices["cosmos"], 9.5);
    }

    #[test]
    fn test_rate_interval_by_tier() {
        let keyless = provider("http://x");
        assert_eq!(keyless.min_request_interval, Duration::from_millis(6000));

        let mut config = test_config();
        config.api_key = Some("key".to_string());
        let demo =
            PriceProvider::with_base_url(&config, std::iter::empty(), "http://x").unwrap();
        assert_eq!(demo.min_request_interval, Duration::from_millis(1200));

        config.tier = PriceTier::Pro;
        let pro = PriceProvider::with_base_url(&config, std::iter::empty(), "http://x").unwrap();
        assert_eq!(pro.min_request_interval, Duration::from_millis(600));
    }
}
