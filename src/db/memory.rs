//! In-memory [`IbcStore`] for tests and local tooling.
//!
//! Mirrors the Postgres upsert semantics, including the COALESCE merge of
//! optional columns, so lifecycle tests exercise the same behavior the
//! production store exhibits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::*;
use super::IbcStore;
use crate::types::{MetricPeriod, MetricType, Network};

type PacketKey = (i64, String, String, String, String, Network);
type MetricKey = (MetricType, String, DateTime<Utc>, MetricPeriod, Network);

#[derive(Default)]
pub struct MemoryStore {
    clients: RwLock<HashMap<(String, Network), ClientRecord>>,
    connections: RwLock<HashMap<(String, Network), ConnectionRecord>>,
    channels: RwLock<HashMap<(String, String, Network), ChannelRecord>>,
    packets: RwLock<HashMap<PacketKey, PacketRecord>>,
    transfers: RwLock<HashMap<(String, Network), TransferRecord>>,
    relayers: RwLock<HashMap<(String, Network), RelayerRecord>>,
    metrics: RwLock<HashMap<MetricKey, MetricSampleRecord>>,
    cursors: RwLock<HashMap<Network, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transfer_count(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn packet_count(&self) -> usize {
        self.packets.read().await.len()
    }
}

fn take_or_keep<T: Clone>(new: &Option<T>, old: &Option<T>) -> Option<T> {
    new.clone().or_else(|| old.clone())
}

fn merge_packet(new: &PacketRecord, old: &PacketRecord) -> PacketRecord {
    let mut merged = new.clone();
    merged.data_hex = take_or_keep(&new.data_hex, &old.data_hex);
    merged.timeout_timestamp = take_or_keep(&new.timeout_timestamp, &old.timeout_timestamp);
    merged.send_tx_hash = take_or_keep(&new.send_tx_hash, &old.send_tx_hash);
    merged.send_timestamp = take_or_keep(&new.send_timestamp, &old.send_timestamp);
    merged.receive_tx_hash = take_or_keep(&new.receive_tx_hash, &old.receive_tx_hash);
    merged.receive_timestamp = take_or_keep(&new.receive_timestamp, &old.receive_timestamp);
    merged.ack_tx_hash = take_or_keep(&new.ack_tx_hash, &old.ack_tx_hash);
    merged.ack_timestamp = take_or_keep(&new.ack_timestamp, &old.ack_timestamp);
    merged.timeout_tx_hash = take_or_keep(&new.timeout_tx_hash, &old.timeout_tx_hash);
    merged.timeout_timestamp_observed =
        take_or_keep(&new.timeout_timestamp_observed, &old.timeout_timestamp_observed);
    merged.relayer_address = take_or_keep(&new.relayer_address, &old.relayer_address);
    merged.completion_time_ms = take_or_keep(&new.completion_time_ms, &old.completion_time_ms);
    merged.source_chain_id = take_or_keep(&new.source_chain_id, &old.source_chain_id);
    merged.destination_chain_id =
        take_or_keep(&new.destination_chain_id, &old.destination_chain_id);
    merged.created_at = old.created_at;
    merged.updated_at = Utc::now();
    merged
}

fn merge_transfer(new: &TransferRecord, old: &TransferRecord) -> TransferRecord {
    let mut merged = new.clone();
    merged.memo = take_or_keep(&new.memo, &old.memo);
    merged.token_symbol = take_or_keep(&new.token_symbol, &old.token_symbol);
    merged.token_display_amount =
        take_or_keep(&new.token_display_amount, &old.token_display_amount);
    merged.send_time = take_or_keep(&new.send_time, &old.send_time);
    merged.complete_time = take_or_keep(&new.complete_time, &old.complete_time);
    merged.completion_tx_hash = take_or_keep(&new.completion_tx_hash, &old.completion_tx_hash);
    merged.completion_height = take_or_keep(&new.completion_height, &old.completion_height);
    merged.completion_timestamp =
        take_or_keep(&new.completion_timestamp, &old.completion_timestamp);
    merged.timeout_tx_hash = take_or_keep(&new.timeout_tx_hash, &old.timeout_tx_hash);
    merged.timeout_height = take_or_keep(&new.timeout_height, &old.timeout_height);
    merged.timeout_timestamp = take_or_keep(&new.timeout_timestamp, &old.timeout_timestamp);
    merged.created_at = old.created_at;
    merged.updated_at = Utc::now();
    merged
}

#[async_trait]
impl IbcStore for MemoryStore {
    async fn upsert_client(&self, client: &ClientRecord) -> Result<()> {
        self.clients
            .write()
            .await
            .insert((client.client_id.clone(), client.network), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str, network: Network) -> Result<Option<ClientRecord>> {
        Ok(self
            .clients
            .read()
            .await
            .get(&(client_id.to_string(), network))
            .cloned())
    }

    async fn upsert_connection(&self, connection: &ConnectionRecord) -> Result<()> {
        self.connections.write().await.insert(
            (connection.connection_id.clone(), connection.network),
            connection.clone(),
        );
        Ok(())
    }

    async fn get_connection(
        &self,
        connection_id: &str,
        network: Network,
    ) -> Result<Option<ConnectionRecord>> {
        Ok(self
            .connections
            .read()
            .await
            .get(&(connection_id.to_string(), network))
            .cloned())
    }

    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<()> {
        self.channels.write().await.insert(
            (
                channel.channel_id.clone(),
                channel.port_id.clone(),
                channel.network,
            ),
            channel.clone(),
        );
        Ok(())
    }

    async fn get_channel(
        &self,
        channel_id: &str,
        port_id: &str,
        network: Network,
    ) -> Result<Option<ChannelRecord>> {
        Ok(self
            .channels
            .read()
            .await
            .get(&(channel_id.to_string(), port_id.to_string(), network))
            .cloned())
    }

    async fn upsert_packet(&self, packet: &PacketRecord) -> Result<()> {
        let key = (
            packet.sequence,
            packet.source_port.clone(),
            packet.source_channel.clone(),
            packet.destination_port.clone(),
            packet.destination_channel.clone(),
            packet.network,
        );
        let mut packets = self.packets.write().await;
        let merged = match packets.get(&key) {
            Some(old) => merge_packet(packet, old),
            None => packet.clone(),
        };
        packets.insert(key, merged);
        Ok(())
    }

    async fn get_packet(
        &self,
        packet_id: &str,
        network: Network,
    ) -> Result<Option<PacketRecord>> {
        Ok(self
            .packets
            .read()
            .await
            .values()
            .find(|p| p.packet_id == packet_id && p.network == network)
            .cloned())
    }

    async fn upsert_transfer(&self, transfer: &TransferRecord) -> Result<()> {
        let key = (transfer.packet_id.clone(), transfer.network);
        let mut transfers = self.transfers.write().await;
        let merged = match transfers.get(&key) {
            Some(old) => merge_transfer(transfer, old),
            None => transfer.clone(),
        };
        transfers.insert(key, merged);
        Ok(())
    }

    async fn get_transfer_by_packet_id(
        &self,
        packet_id: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>> {
        Ok(self
            .transfers
            .read()
            .await
            .get(&(packet_id.to_string(), network))
            .cloned())
    }

    async fn get_transfer_by_tx_hash(
        &self,
        tx_hash: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>> {
        Ok(self
            .transfers
            .read()
            .await
            .values()
            .filter(|t| t.tx_hash == tx_hash && t.network == network)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn upsert_relayer(&self, relayer: &RelayerRecord) -> Result<()> {
        self.relayers
            .write()
            .await
            .insert((relayer.address.clone(), relayer.network), relayer.clone());
        Ok(())
    }

    async fn get_relayer(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Option<RelayerRecord>> {
        Ok(self
            .relayers
            .read()
            .await
            .get(&(address.to_string(), network))
            .cloned())
    }

    async fn upsert_metric_sample(&self, sample: &MetricSampleRecord) -> Result<()> {
        self.metrics.write().await.insert(
            (
                sample.metric_type,
                sample.reference_id.clone(),
                sample.timestamp,
                sample.period,
                sample.network,
            ),
            sample.clone(),
        );
        Ok(())
    }

    async fn get_metric_sample(
        &self,
        metric_type: MetricType,
        reference_id: &str,
        timestamp: DateTime<Utc>,
        period: MetricPeriod,
        network: Network,
    ) -> Result<Option<MetricSampleRecord>> {
        Ok(self
            .metrics
            .read()
            .await
            .get(&(
                metric_type,
                reference_id.to_string(),
                timestamp,
                period,
                network,
            ))
            .cloned())
    }

    async fn get_ingest_cursor(&self, network: Network) -> Result<Option<i64>> {
        Ok(self.cursors.read().await.get(&network).copied())
    }

    async fn set_ingest_cursor(&self, network: Network, height: i64) -> Result<()> {
        self.cursors.write().await.insert(network, height);
        Ok(())
    }
}
