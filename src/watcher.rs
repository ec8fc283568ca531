//! Per-network ingestion worker.
//!
//! Polls the local chain's LCD for new blocks, pulls the IBC events out of
//! each transaction and feeds them to the event processor in block order.
//! The last processed height is persisted so a restart resumes where it
//! stopped.

use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use serde::{de, Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;

use crate::db::IbcStore;
use crate::metrics;
use crate::processor::EventProcessor;
use crate::types::{EventAttribute, EventContext, IbcEvent, Network};

/// Event types forwarded to the processor; everything else in a transaction
/// (bank transfers, gas events) is noise here.
const RECOGNIZED_EVENTS: [&str; 19] = [
    "send_packet",
    "recv_packet",
    "acknowledge_packet",
    "write_acknowledgement",
    "timeout_packet",
    "fungible_token_packet",
    "transfer_packet",
    "create_client",
    "update_client",
    "connection_open_init",
    "connection_open_try",
    "connection_open_ack",
    "connection_open_confirm",
    "channel_open_init",
    "channel_open_try",
    "channel_open_ack",
    "channel_open_confirm",
    "channel_close_init",
    "channel_close_confirm",
];

fn is_recognized(event_type: &str) -> bool {
    RECOGNIZED_EVENTS.contains(&event_type)
}

/// Response types for LCD API calls
#[derive(Debug, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txhash: String,
    #[serde(deserialize_with = "deserialize_string_to_i64")]
    height: i64,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    type_str: String,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    key: String,
    value: String,
}

/// Local chain transaction watcher feeding one network's event stream.
pub struct ChainWatcher {
    lcd_url: String,
    network: Network,
    poll_interval: Duration,
    store: Arc<dyn IbcStore>,
    processor: Arc<EventProcessor>,
    http: reqwest::Client,
}

impl ChainWatcher {
    pub fn new(
        lcd_url: &str,
        network: Network,
        poll_interval_ms: u64,
        store: Arc<dyn IbcStore>,
        processor: Arc<EventProcessor>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()
            .wrap_err("Failed to build HTTP client for chain watcher")?;

        tracing::info!(
            %network,
            lcd_url = %lcd_url,
            "Chain watcher initialized"
        );

        Ok(ChainWatcher {
            lcd_url: lcd_url.trim_end_matches('/').to_string(),
            network,
            poll_interval: Duration::from_millis(poll_interval_ms),
            store,
            processor,
            http,
        })
    }

    /// Run the watcher loop until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
        let mut consecutive_failures: u32 = 0;
        const MAX_CONSECUTIVE_FAILURES: u32 = 30;

        loop {
            if shutdown.try_recv().is_ok() {
                tracing::info!(network = %self.network, "Chain watcher shutting down");
                return Ok(());
            }

            let last_height = self
                .store
                .get_ingest_cursor(self.network)
                .await
                .wrap_err("Failed to read ingest cursor")?
                .unwrap_or(0);

            let current_height = match self.get_current_height().await {
                Ok(h) => {
                    consecutive_failures = 0;
                    h
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let backoff = Duration::from_secs((2u64).pow(consecutive_failures.min(6)));
                    tracing::warn!(
                        network = %self.network,
                        error = %e,
                        consecutive_failures,
                        backoff_secs = backoff.as_secs(),
                        "Failed to get block height, will retry"
                    );
                    metrics::record_error(self.network.as_str(), "height_fetch");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(e.wrap_err(format!(
                            "Height fetch failed {} consecutive times",
                            consecutive_failures
                        )));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => continue,
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            };

            if current_height <= last_height as u64 {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                    _ = shutdown.recv() => return Ok(()),
                }
            }

            let blocks_behind = current_height.saturating_sub(last_height as u64);
            if blocks_behind > 10 {
                tracing::info!(
                    network = %self.network,
                    from = last_height + 1,
                    to = current_height,
                    blocks_behind,
                    "Watcher catching up"
                );
            }

            for height in (last_height + 1) as u64..=current_height {
                if shutdown.try_recv().is_ok() {
                    return Ok(());
                }

                match self.process_block(height).await {
                    Ok(event_count) => {
                        self.store
                            .set_ingest_cursor(self.network, height as i64)
                            .await?;
                        metrics::record_block_processed(self.network.as_str(), height);
                        metrics::record_successful_poll(self.network.as_str());
                        if event_count > 0 {
                            tracing::debug!(
                                network = %self.network,
                                height,
                                event_count,
                                "Processed block"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            network = %self.network,
                            height,
                            error = %e,
                            "Error processing block, will retry next cycle"
                        );
                        metrics::record_error(self.network.as_str(), "block_processing");
                        break;
                    }
                }

                // Brief yield during catchup to avoid starving other tasks
                // and hammering the LCD
                if blocks_behind > 50 && height % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    /// Pull one block's transactions and run their IBC events through the
    /// processor. A bad event is logged and skipped, never fatal for the
    /// block.
    async fn process_block(&self, height: u64) -> Result<usize> {
        let url = format!(
            "{}/cosmos/tx/v1beta1/txs?events=tx.height={}",
            self.lcd_url, height
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to query transactions at height {}", height))?;

        let status = response.status();
        let body = response.text().await.wrap_err_with(|| {
            format!("Failed to read transaction response body at height {}", height)
        })?;
        if !status.is_success() {
            return Err(eyre!(
                "Tx query returned status {} at height {} url={} body={}",
                status,
                height,
                url,
                clip_for_log(&body, 300)
            ));
        }

        let response: TxSearchResponse = serde_json::from_str(&body).wrap_err_with(|| {
            format!(
                "Failed to parse transaction response at height {} body={}",
                height,
                clip_for_log(&body, 300)
            )
        })?;

        let mut processed = 0;
        for tx in response.tx_responses {
            let block_timestamp = parse_block_timestamp(&tx.timestamp);
            let ctx = EventContext {
                tx_hash: tx.txhash.clone(),
                height: tx.height,
                block_timestamp,
                network: self.network,
            };

            for raw in &tx.events {
                if !is_recognized(&raw.type_str) {
                    continue;
                }
                let event = IbcEvent {
                    event_type: raw.type_str.clone(),
                    attributes: raw
                        .attributes
                        .iter()
                        .map(|a| EventAttribute {
                            key: a.key.clone(),
                            value: a.value.clone(),
                        })
                        .collect(),
                };

                if let Err(e) = self.processor.process_event(&event, &ctx).await {
                    tracing::warn!(
                        network = %self.network,
                        tx_hash = %tx.txhash,
                        event_type = %event.event_type,
                        error = %e,
                        "Event processing failed, skipping event"
                    );
                    metrics::record_error(self.network.as_str(), "event_processing");
                    continue;
                }
                processed += 1;
            }
        }

        Ok(processed)
    }

    /// Current block height via the LCD latest-block endpoint.
    async fn get_current_height(&self) -> Result<u64> {
        let url = format!(
            "{}/cosmos/base/tendermint/v1beta1/blocks/latest",
            self.lcd_url
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query block height")?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .wrap_err("Failed to read block height response body")?;
        if !status.is_success() {
            return Err(eyre!(
                "Height query returned status {} url={} body={}",
                status,
                url,
                clip_for_log(&body, 300)
            ));
        }

        let json: serde_json::Value = serde_json::from_str(&body).wrap_err_with(|| {
            format!(
                "Failed to parse block height response body={}",
                clip_for_log(&body, 300)
            )
        })?;

        json["block"]["header"]["height"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| eyre!("Missing or invalid height in LCD response"))
    }
}

fn parse_block_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn clip_for_log(input: &str, max_chars: usize) -> String {
    let clipped: String = input.chars().take(max_chars).collect();
    if input.chars().count() > max_chars {
        format!("{}...(truncated)", clipped)
    } else {
        clipped
    }
}

/// Custom deserializer for Cosmos API responses that return numbers as
/// strings. Handles both string "123" and numeric 123 formats.
fn deserialize_string_to_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrI64Visitor;

    impl de::Visitor<'_> for StringOrI64Visitor {
        type Value = i64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer")
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<i64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<i64, E>
        where
            E: de::Error,
        {
            i64::try_from(value)
                .map_err(|_| E::custom(format!("u64 {} out of range for i64", value)))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<i64, E>
        where
            E: de::Error,
        {
            value.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(StringOrI64Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tx_response_with_string_height() {
        let json = r#"{
            "txhash": "ABC123",
            "height": "208",
            "timestamp": "2026-01-10T12:00:00Z",
            "events": []
        }"#;

        let response: TxResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.height, 208);
        assert_eq!(response.txhash, "ABC123");
    }

    #[test]
    fn test_deserialize_tx_response_with_numeric_height() {
        let json = r#"{
            "txhash": "DEF456",
            "height": 12345,
            "events": []
        }"#;

        let response: TxResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.height, 12345);
    }

    #[test]
    fn test_deserialize_tx_search_response_empty() {
        let json = r#"{}"#;
        let response: TxSearchResponse = serde_json::from_str(json).unwrap();
        assert!(response.tx_responses.is_empty());
    }

    #[test]
    fn test_recognized_event_filter() {
        assert!(is_recognized("send_packet"));
        assert!(is_recognized("fungible_token_packet"));
        assert!(is_recognized("channel_close_confirm"));
        assert!(is_recognized("create_client"));
        assert!(!is_recognized("coin_spent"));
        assert!(!is_recognized("message"));
    }

    #[test]
    fn test_parse_block_timestamp() {
        let ts = parse_block_timestamp("2026-01-10T12:30:45Z");
        assert_eq!(ts.to_rfc3339(), "2026-01-10T12:30:45+00:00");
        // Garbage falls back to now rather than failing the block.
        let fallback = parse_block_timestamp("not-a-time");
        assert!(fallback <= Utc::now());
    }
}
