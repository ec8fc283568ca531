//! Counterparty chain resolution.
//!
//! Walks the local Channel → Connection → Client graph to name the chain on
//! the other end of a channel, and classifies transfer direction so both
//! sides of a transfer can be filled in.

use std::sync::Arc;
use tracing::warn;

use crate::chains;
use crate::config::LocalChainConfig;
use crate::db::IbcStore;
use crate::types::Network;

/// Resolved identity of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub chain_id: String,
    pub chain_name: String,
}

/// Which way a transfer crosses the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Outbound,
    Inbound,
}

/// Source and destination identities of one transfer. Sides that could not
/// be resolved stay empty for the processor's fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferChainInfo {
    pub source_chain_id: String,
    pub source_chain_name: String,
    pub destination_chain_id: String,
    pub destination_chain_name: String,
}

pub struct ChainResolver {
    store: Arc<dyn IbcStore>,
    local_chain: LocalChainConfig,
}

impl ChainResolver {
    pub fn new(store: Arc<dyn IbcStore>, local_chain: LocalChainConfig) -> Self {
        ChainResolver { store, local_chain }
    }

    /// Chain id configured for the local chain on a network.
    pub fn local_chain_id(&self, network: Network) -> &str {
        self.local_chain.chain_id(network)
    }

    /// Walk channel → connection → client and name the counterparty chain.
    /// Any missing link resolves to None.
    pub async fn chain_info_from_channel(
        &self,
        channel_id: &str,
        port_id: &str,
        network: Network,
    ) -> eyre::Result<Option<ChainInfo>> {
        let Some(channel) = self.store.get_channel(channel_id, port_id, network).await? else {
            warn!(%channel_id, %port_id, %network, "Channel not found while resolving chain");
            return Ok(None);
        };

        let Some(connection) = self
            .store
            .get_connection(&channel.connection_id, network)
            .await?
        else {
            warn!(
                connection_id = %channel.connection_id,
                %channel_id,
                %network,
                "Connection not found while resolving chain"
            );
            return Ok(None);
        };

        let Some(client) = self.store.get_client(&connection.client_id, network).await? else {
            warn!(
                client_id = %connection.client_id,
                connection_id = %connection.connection_id,
                %network,
                "Client not found while resolving chain"
            );
            return Ok(None);
        };

        if client.chain_id.is_empty() {
            warn!(client_id = %client.client_id, %network, "Client has no chain id");
            return Ok(None);
        }

        Ok(Some(ChainInfo {
            chain_name: chains::resolve(&client.chain_id).to_string(),
            chain_id: client.chain_id,
        }))
    }

    /// Classify direction and fill both sides of a transfer.
    pub async fn transfer_chain_info(
        &self,
        event_type: &str,
        src_channel: &str,
        src_port: &str,
        dst_channel: &str,
        dst_port: &str,
        network: Network,
    ) -> eyre::Result<TransferChainInfo> {
        let direction = classify_direction(event_type, src_channel, dst_channel);
        let local_id = self.local_chain.chain_id(network).to_string();
        let local_name = chains::resolve(&local_id).to_string();

        let mut info = TransferChainInfo::default();
        match direction {
            TransferDirection::Outbound => {
                info.source_chain_id = local_id;
                info.source_chain_name = local_name;
                if let Some(remote) = self
                    .chain_info_from_channel(src_channel, src_port, network)
                    .await?
                {
                    info.destination_chain_id = remote.chain_id;
                    info.destination_chain_name = remote.chain_name;
                }
            }
            TransferDirection::Inbound => {
                info.destination_chain_id = local_id;
                info.destination_chain_name = local_name;
                if let Some(remote) = self
                    .chain_info_from_channel(dst_channel, dst_port, network)
                    .await?
                {
                    info.source_chain_id = remote.chain_id;
                    info.source_chain_name = remote.chain_name;
                }
            }
        }

        Ok(info)
    }
}

/// Low-numbered `channel-<n>` identifiers are assumed local: counterparty
/// hubs tend to allocate much higher channel numbers toward a young chain.
fn looks_local(channel: &str) -> bool {
    channel
        .strip_prefix("channel-")
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| n < 100)
        .unwrap_or(false)
}

/// Decide transfer direction from the event type, falling back to channel
/// identifier shape. Ties default to outbound.
pub fn classify_direction(
    event_type: &str,
    src_channel: &str,
    dst_channel: &str,
) -> TransferDirection {
    match event_type {
        "send_packet" => TransferDirection::Outbound,
        "recv_packet" => TransferDirection::Inbound,
        _ => {
            let src_local = looks_local(src_channel);
            let dst_local = looks_local(dst_channel);
            if dst_local && !src_local {
                TransferDirection::Inbound
            } else {
                TransferDirection::Outbound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{ChannelRecord, ClientRecord, ConnectionRecord};
    use crate::types::{ChannelOrdering, ChannelState, ConnectionState};
    use chrono::Utc;
    use std::collections::HashMap;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        store
            .upsert_channel(&ChannelRecord {
                channel_id: "channel-0".to_string(),
                port_id: "transfer".to_string(),
                network: Network::Mainnet,
                connection_id: "connection-0".to_string(),
                counterparty_channel_id: "channel-7000".to_string(),
                counterparty_port_id: "transfer".to_string(),
                state: ChannelState::Open,
                ordering: ChannelOrdering::Unordered,
                version: "ics20-1".to_string(),
                packet_count: 0,
                success_count: 0,
                failure_count: 0,
                timeout_count: 0,
                avg_completion_time_ms: 0.0,
                total_tokens_transferred: HashMap::new(),
                active_relayers: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store
            .upsert_connection(&ConnectionRecord {
                connection_id: "connection-0".to_string(),
                network: Network::Mainnet,
                client_id: "07-tendermint-0".to_string(),
                counterparty_connection_id: "connection-1000".to_string(),
                counterparty_client_id: "07-tendermint-999".to_string(),
                counterparty_chain_id: "osmosis-1".to_string(),
                state: ConnectionState::Open,
                delay_period: 0,
                channel_count: 1,
                last_activity: now,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store
            .upsert_client(&ClientRecord {
                client_id: "07-tendermint-0".to_string(),
                network: Network::Mainnet,
                client_type: "07-tendermint".to_string(),
                chain_id: "osmosis-1".to_string(),
                latest_height: 100,
                frozen: false,
                connection_count: 1,
                last_update: now,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store
    }

    fn resolver(store: Arc<MemoryStore>) -> ChainResolver {
        ChainResolver::new(store, LocalChainConfig::default())
    }

    #[tokio::test]
    async fn test_resolves_counterparty_through_graph() {
        let resolver = resolver(seeded_store().await);
        let info = resolver
            .chain_info_from_channel("channel-0", "transfer", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.chain_id, "osmosis-1");
        assert_eq!(info.chain_name, "Osmosis");
    }

    #[tokio::test]
    async fn test_missing_channel_resolves_none() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let info = resolver
            .chain_info_from_channel("channel-99", "transfer", Network::Mainnet)
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_missing_client_resolves_none() {
        let store = seeded_store().await;
        // Repoint the connection at a client that does not exist.
        let mut conn = store
            .get_connection("connection-0", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        conn.client_id = "07-tendermint-404".to_string();
        store.upsert_connection(&conn).await.unwrap();

        let resolver = resolver(store);
        let info = resolver
            .chain_info_from_channel("channel-0", "transfer", Network::Mainnet)
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[test]
    fn test_direction_by_event_type() {
        assert_eq!(
            classify_direction("send_packet", "channel-9000", "channel-1"),
            TransferDirection::Outbound
        );
        assert_eq!(
            classify_direction("recv_packet", "channel-1", "channel-9000"),
            TransferDirection::Inbound
        );
    }

    #[test]
    fn test_direction_by_channel_shape() {
        // Only the destination looks local: inbound.
        assert_eq!(
            classify_direction("fungible_token_packet", "channel-7000", "channel-3"),
            TransferDirection::Inbound
        );
        // Only the source looks local: outbound.
        assert_eq!(
            classify_direction("fungible_token_packet", "channel-3", "channel-7000"),
            TransferDirection::Outbound
        );
        // Tie defaults to outbound.
        assert_eq!(
            classify_direction("fungible_token_packet", "channel-1", "channel-2"),
            TransferDirection::Outbound
        );
        assert_eq!(
            classify_direction("fungible_token_packet", "channel-7000", "channel-8000"),
            TransferDirection::Outbound
        );
    }

    #[tokio::test]
    async fn test_outbound_transfer_chain_info() {
        let resolver = resolver(seeded_store().await);
        let info = resolver
            .transfer_chain_info(
                "send_packet",
                "channel-0",
                "transfer",
                "channel-7000",
                "transfer",
                Network::Mainnet,
            )
            .await
            .unwrap();
        assert_eq!(info.source_chain_id, "bbn-1");
        assert_eq!(info.source_chain_name, "Babylon");
        assert_eq!(info.destination_chain_id, "osmosis-1");
        assert_eq!(info.destination_chain_name, "Osmosis");
    }

    #[tokio::test]
    async fn test_inbound_transfer_chain_info() {
        let resolver = resolver(seeded_store().await);
        let info = resolver
            .transfer_chain_info(
                "recv_packet",
                "channel-7000",
                "transfer",
                "channel-0",
                "transfer",
                Network::Mainnet,
            )
            .await
            .unwrap();
        assert_eq!(info.destination_chain_id, "bbn-1");
        assert_eq!(info.source_chain_id, "osmosis-1");
    }

    #[tokio::test]
    async fn test_unresolved_side_left_empty() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let info = resolver
            .transfer_chain_info(
                "send_packet",
                "channel-5",
                "transfer",
                "channel-7000",
                "transfer",
                Network::Mainnet,
            )
            .await
            .unwrap();
        assert_eq!(info.source_chain_id, "bbn-1");
        assert!(info.destination_chain_id.is_empty());
        assert!(info.destination_chain_name.is_empty());
    }
}
