use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::types::{
    ChannelOrdering, ChannelState, ConnectionState, MetricPeriod, MetricType, Network,
    PacketStatus, TransferStatus,
};

// Note: We use String for amount fields throughout. Amounts are base-unit
// integers of arbitrary magnitude; the database stores them as text and any
// arithmetic goes through u128 helpers, never floats.
//
// Rollup maps (token totals, relayer volumes) live in JSONB columns and are
// mapped with #[sqlx(json)].

/// Light client of a counterparty chain, tracked from create/update events.
/// Unique by `(client_id, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub network: Network,
    pub client_type: String,
    /// Chain id of the counterparty this client tracks
    pub chain_id: String,
    pub latest_height: i64,
    pub frozen: bool,
    pub connection_count: i32,
    pub last_update: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// IBC connection referencing exactly one client.
/// Unique by `(connection_id, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub network: Network,
    pub client_id: String,
    pub counterparty_connection_id: String,
    pub counterparty_client_id: String,
    pub counterparty_chain_id: String,
    pub state: ConnectionState,
    pub delay_period: i64,
    pub channel_count: i32,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// IBC channel riding a connection, with per-channel analytics rollups.
/// Unique by `(channel_id, port_id, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub port_id: String,
    pub network: Network,
    pub connection_id: String,
    pub counterparty_channel_id: String,
    pub counterparty_port_id: String,
    pub state: ChannelState,
    pub ordering: ChannelOrdering,
    pub version: String,
    pub packet_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub timeout_count: i64,
    pub avg_completion_time_ms: f64,
    /// denom → total base units transferred (decimal string)
    #[sqlx(json)]
    pub total_tokens_transferred: HashMap<String, String>,
    /// Relayer addresses seen completing packets on this channel
    #[sqlx(json)]
    pub active_relayers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One IBC packet, keyed by its full routing tuple.
/// Unique by `(sequence, source_port, source_channel, destination_port,
/// destination_channel, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Synthesized fingerprint, used as the transfer foreign key
    pub packet_id: String,
    pub sequence: i64,
    pub source_port: String,
    pub source_channel: String,
    pub destination_port: String,
    pub destination_channel: String,
    pub network: Network,
    pub data_hex: Option<String>,
    pub timeout_revision_number: i64,
    pub timeout_revision_height: i64,
    pub timeout_timestamp: Option<String>,
    pub status: PacketStatus,
    pub send_tx_hash: Option<String>,
    pub send_timestamp: Option<DateTime<Utc>>,
    pub receive_tx_hash: Option<String>,
    pub receive_timestamp: Option<DateTime<Utc>>,
    pub ack_tx_hash: Option<String>,
    pub ack_timestamp: Option<DateTime<Utc>>,
    pub timeout_tx_hash: Option<String>,
    pub timeout_timestamp_observed: Option<DateTime<Utc>>,
    pub relayer_address: Option<String>,
    /// Set only when both send and terminating timestamps exist
    pub completion_time_ms: Option<i64>,
    pub source_chain_id: Option<String>,
    pub destination_chain_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token transfer riding a packet, 1:1 by packet id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransferRecord {
    pub packet_id: String,
    pub network: Network,
    pub status: TransferStatus,
    pub sequence: i64,
    pub sender: String,
    pub receiver: String,
    /// Base units, decimal string
    pub amount: String,
    pub denom: String,
    pub memo: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub token_symbol: Option<String>,
    pub token_display_amount: Option<String>,
    pub source_chain_id: String,
    pub source_chain_name: String,
    pub destination_chain_id: String,
    pub destination_chain_name: String,
    pub source_channel_id: String,
    pub destination_channel_id: String,
    /// Transaction that created this transfer record
    pub tx_hash: String,
    pub send_time: Option<DateTime<Utc>>,
    pub complete_time: Option<DateTime<Utc>>,
    pub completion_tx_hash: Option<String>,
    pub completion_height: Option<i64>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub timeout_tx_hash: Option<String>,
    pub timeout_height: Option<i64>,
    pub timeout_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-channel activity of one relayer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayerChannelActivity {
    pub packet_count: i64,
    /// denom → total base units relayed on this channel
    pub volumes: HashMap<String, String>,
}

/// Relayer analytics, unique by `(address, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RelayerRecord {
    pub address: String,
    pub network: Network,
    pub total_packets: i64,
    pub successful_packets: i64,
    pub failed_packets: i64,
    pub avg_relay_time_ms: f64,
    /// chain id → denom → amount
    #[sqlx(json)]
    pub volumes_by_chain: HashMap<String, HashMap<String, String>>,
    /// denom → amount
    #[sqlx(json)]
    pub volumes_by_denom: HashMap<String, String>,
    /// channel id → activity
    #[sqlx(json)]
    pub active_channels: HashMap<String, RelayerChannelActivity>,
    #[sqlx(json)]
    pub chains_served: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One denom/amount pair inside a metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub denom: String,
    pub amount: String,
}

/// Periodic rollup, unique by
/// `(metric_type, reference_id, timestamp, period, network)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MetricSampleRecord {
    pub metric_type: MetricType,
    pub reference_id: String,
    pub timestamp: DateTime<Utc>,
    pub period: MetricPeriod,
    pub network: Network,
    pub packet_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub timeout_count: i64,
    pub avg_completion_time_ms: f64,
    #[sqlx(json)]
    pub volumes: Vec<VolumeEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Last processed block height per network ingest worker.
#[derive(Debug, Clone, FromRow)]
pub struct IngestCursor {
    pub network: Network,
    pub last_processed_height: i64,
    pub updated_at: DateTime<Utc>,
}

/// Add two base-unit decimal strings. Fails closed on malformed input by
/// keeping the previous total.
pub fn add_amounts(total: &str, delta: &str) -> String {
    match (total.parse::<u128>(), delta.parse::<u128>()) {
        (Ok(a), Ok(b)) => a.saturating_add(b).to_string(),
        (Ok(a), Err(_)) => a.to_string(),
        (Err(_), Ok(b)) => b.to_string(),
        (Err(_), Err(_)) => "0".to_string(),
    }
}

/// Fold a delta into a running average given the new observation count.
pub fn running_average(current: f64, count: i64, observation: f64) -> f64 {
    if count <= 1 {
        return observation;
    }
    current + (observation - current) / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_amounts() {
        assert_eq!(add_amounts("100", "23"), "123");
        assert_eq!(add_amounts("0", "5"), "5");
        assert_eq!(add_amounts("garbage", "5"), "5");
        assert_eq!(add_amounts("7", "garbage"), "7");
    }

    #[test]
    fn test_add_amounts_saturates() {
        let max = u128::MAX.to_string();
        assert_eq!(add_amounts(&max, "1"), max);
    }

    #[test]
    fn test_running_average() {
        let mut avg = 0.0;
        for (i, obs) in [100.0, 200.0, 300.0].iter().enumerate() {
            avg = running_average(avg, (i + 1) as i64, *obs);
        }
        assert!((avg - 200.0).abs() < f64::EPSILON);
    }
}
