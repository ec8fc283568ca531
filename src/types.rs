use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network an observation belongs to. Every entity is keyed by this alongside
/// its natural identifiers, so mainnet and testnet rows never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Chain id of the local chain when no override is configured.
    pub fn default_local_chain_id(&self) -> &'static str {
        match self {
            Network::Mainnet => "bbn-1",
            Network::Testnet => "bbn-test-5",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(eyre!("Unknown network: {}", other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an IBC packet as seen from the local chain.
///
/// Sent is the source-side origin; Received is observed on the destination
/// side and may coexist with the source view of the same packet key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PacketStatus {
    Sent,
    Received,
    Acknowledged,
    Timeout,
}

impl PacketStatus {
    /// Whether the status is terminal on the source side.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PacketStatus::Acknowledged | PacketStatus::Timeout)
    }
}

/// Business status of a token transfer riding a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Received,
    Completed,
    Failed,
    Timeout,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Timeout
        )
    }
}

/// IBC channel handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelState {
    Init,
    Tryopen,
    Open,
    Closed,
}

/// IBC connection handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Init,
    Tryopen,
    Open,
}

/// Packet ordering guarantee of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelOrdering {
    Ordered,
    Unordered,
}

/// What a metric sample aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Channel,
    Relayer,
    Chain,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Channel => "channel",
            MetricType::Relayer => "relayer",
            MetricType::Chain => "chain",
        }
    }
}

/// Rollup period of a metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MetricPeriod {
    Hourly,
    Daily,
    Weekly,
}

/// Where a token price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    External,
    Hardcoded,
    Fallback,
}

/// IBC timeout height `{revision_number, revision_height}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutHeight {
    pub revision_number: u64,
    pub revision_height: u64,
}

impl TimeoutHeight {
    /// Parse the `"<revision>-<height>"` form emitted in packet events.
    pub fn parse(s: &str) -> Option<Self> {
        let (rev, height) = s.split_once('-')?;
        Some(TimeoutHeight {
            revision_number: rev.parse().ok()?,
            revision_height: height.parse().ok()?,
        })
    }
}

/// A raw chain event: a type tag plus key/value attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

impl IbcEvent {
    pub fn new(event_type: &str, attributes: Vec<(&str, &str)>) -> Self {
        IbcEvent {
            event_type: event_type.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| EventAttribute {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }
}

/// Where an event was observed: the enclosing transaction and block.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub tx_hash: String,
    pub height: i64,
    pub block_timestamp: DateTime<Utc>,
    pub network: Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!(Network::parse("mainnet").unwrap(), Network::Mainnet);
        assert_eq!(Network::parse(" Testnet ").unwrap(), Network::Testnet);
        assert!(Network::parse("devnet").is_err());
    }

    #[test]
    fn test_default_local_chain_ids() {
        assert_eq!(Network::Mainnet.default_local_chain_id(), "bbn-1");
        assert_eq!(Network::Testnet.default_local_chain_id(), "bbn-test-5");
    }

    #[test]
    fn test_timeout_height_parse() {
        let h = TimeoutHeight::parse("1-123456").unwrap();
        assert_eq!(h.revision_number, 1);
        assert_eq!(h.revision_height, 123456);
        assert!(TimeoutHeight::parse("garbage").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Timeout.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(PacketStatus::Acknowledged.is_terminal());
        assert!(!PacketStatus::Received.is_terminal());
    }
}
