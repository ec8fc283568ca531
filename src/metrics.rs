//! Prometheus metrics for the IBC indexer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Block ingestion metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "indexer_blocks_processed_total",
        "Total number of blocks processed",
        &["network"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "indexer_latest_block",
        "Latest block height processed",
        &["network"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_PROCESSED: CounterVec = register_counter_vec!(
        "indexer_events_processed_total",
        "Total number of IBC events processed",
        &["network", "type"]
    ).unwrap();

    pub static ref EVENTS_DROPPED: CounterVec = register_counter_vec!(
        "indexer_events_dropped_total",
        "Events dropped as malformed or uncorrelatable",
        &["network", "reason"]
    ).unwrap();

    // Transfer lifecycle metrics
    pub static ref TRANSFERS_INDEXED: CounterVec = register_counter_vec!(
        "indexer_transfers_indexed_total",
        "Transfers reaching a lifecycle status",
        &["network", "status"]
    ).unwrap();

    // Price provider metrics
    pub static ref PRICE_REQUESTS: Counter = register_counter!(
        "indexer_price_requests_total",
        "Outbound price provider requests"
    ).unwrap();

    pub static ref PRICE_FAILURES: CounterVec = register_counter_vec!(
        "indexer_price_failures_total",
        "Price provider failures by reason",
        &["reason"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "indexer_errors_total",
        "Total number of errors",
        &["network", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "indexer_up",
        "Whether the indexer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "indexer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["network"]
    ).unwrap();
}

/// Record a block processed
pub fn record_block_processed(network: &str, height: u64) {
    BLOCKS_PROCESSED.with_label_values(&[network]).inc();
    LATEST_BLOCK.with_label_values(&[network]).set(height as f64);
}

/// Record an event handled by the processor
pub fn record_event(network: &str, event_type: &str) {
    EVENTS_PROCESSED
        .with_label_values(&[network, event_type])
        .inc();
}

/// Record an event dropped before reaching the state machine
pub fn record_event_dropped(network: &str, reason: &str) {
    EVENTS_DROPPED.with_label_values(&[network, reason]).inc();
}

/// Record a transfer reaching a status
pub fn record_transfer(network: &str, status: &str) {
    TRANSFERS_INDEXED
        .with_label_values(&[network, status])
        .inc();
}

/// Record an outbound price request
pub fn record_price_request() {
    PRICE_REQUESTS.inc();
}

/// Record a price provider failure
pub fn record_price_failure(reason: &str) {
    PRICE_FAILURES.with_label_values(&[reason]).inc();
}

/// Record an error
pub fn record_error(network: &str, error_type: &str) {
    ERRORS.with_label_values(&[network, error_type]).inc();
}

/// Record last successful poll
pub fn record_successful_poll(network: &str) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[network])
        .set(timestamp);
}
