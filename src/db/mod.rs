//! Persistence layer: connection pool, migrations and the entity
//! repositories behind the [`IbcStore`] trait.
//!
//! Every write is an upsert keyed on the entity's natural uniqueness tuple,
//! so reingesting a block can never duplicate a row.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub mod memory;
pub mod models;

pub use models::*;

use crate::types::{MetricPeriod, MetricType, Network};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Narrow persistence surface consumed by the resolver, the event processor
/// and the ingest workers.
#[async_trait]
pub trait IbcStore: Send + Sync {
    async fn upsert_client(&self, client: &ClientRecord) -> Result<()>;
    async fn get_client(&self, client_id: &str, network: Network) -> Result<Option<ClientRecord>>;

    async fn upsert_connection(&self, connection: &ConnectionRecord) -> Result<()>;
    async fn get_connection(
        &self,
        connection_id: &str,
        network: Network,
    ) -> Result<Option<ConnectionRecord>>;

    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<()>;
    async fn get_channel(
        &self,
        channel_id: &str,
        port_id: &str,
        network: Network,
    ) -> Result<Option<ChannelRecord>>;

    async fn upsert_packet(&self, packet: &PacketRecord) -> Result<()>;
    async fn get_packet(&self, packet_id: &str, network: Network)
        -> Result<Option<PacketRecord>>;

    async fn upsert_transfer(&self, transfer: &TransferRecord) -> Result<()>;
    async fn get_transfer_by_packet_id(
        &self,
        packet_id: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>>;
    /// Most recent transfer created by a transaction within a network.
    async fn get_transfer_by_tx_hash(
        &self,
        tx_hash: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>>;

    async fn upsert_relayer(&self, relayer: &RelayerRecord) -> Result<()>;
    async fn get_relayer(&self, address: &str, network: Network)
        -> Result<Option<RelayerRecord>>;

    async fn upsert_metric_sample(&self, sample: &MetricSampleRecord) -> Result<()>;
    async fn get_metric_sample(
        &self,
        metric_type: MetricType,
        reference_id: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        period: MetricPeriod,
        network: Network,
    ) -> Result<Option<MetricSampleRecord>>;

    async fn get_ingest_cursor(&self, network: Network) -> Result<Option<i64>>;
    async fn set_ingest_cursor(&self, network: Network, height: i64) -> Result<()>;
}

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const CHANNEL_SELECT: &str = r#"channel_id, port_id, network, connection_id,
    counterparty_channel_id, counterparty_port_id, state, ordering, version,
    packet_count, success_count, failure_count, timeout_count,
    avg_completion_time_ms, total_tokens_transferred, active_relayers,
    created_at, updated_at"#;

const PACKET_SELECT: &str = r#"packet_id, sequence, source_port, source_channel,
    destination_port, destination_channel, network, data_hex,
    timeout_revision_number, timeout_revision_height, timeout_timestamp,
    status, send_tx_hash, send_timestamp, receive_tx_hash, receive_timestamp,
    ack_tx_hash, ack_timestamp, timeout_tx_hash, timeout_timestamp_observed,
    relayer_address, completion_time_ms, source_chain_id, destination_chain_id,
    created_at, updated_at"#;

const TRANSFER_SELECT: &str = r#"packet_id, network, status, sequence, sender,
    receiver, amount, denom, memo, success, error, token_symbol,
    token_display_amount, source_chain_id, source_chain_name,
    destination_chain_id, destination_chain_name, source_channel_id,
    destination_channel_id, tx_hash, send_time, complete_time,
    completion_tx_hash, completion_height, completion_timestamp,
    timeout_tx_hash, timeout_height, timeout_timestamp, created_at, updated_at"#;

const RELAYER_SELECT: &str = r#"address, network, total_packets,
    successful_packets, failed_packets, avg_relay_time_ms, volumes_by_chain,
    volumes_by_denom, active_channels, chains_served, created_at, updated_at"#;

const METRIC_SELECT: &str = r#"metric_type, reference_id, timestamp, period,
    network, packet_count, success_count, failure_count, timeout_count,
    avg_completion_time_ms, volumes, created_at, updated_at"#;

#[async_trait]
impl IbcStore for PgStore {
    async fn upsert_client(&self, client: &ClientRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_clients (client_id, network, client_type, chain_id,
                latest_height, frozen, connection_count, last_update)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (client_id, network) DO UPDATE SET
                client_type = EXCLUDED.client_type,
                chain_id = EXCLUDED.chain_id,
                latest_height = EXCLUDED.latest_height,
                frozen = EXCLUDED.frozen,
                connection_count = EXCLUDED.connection_count,
                last_update = EXCLUDED.last_update,
                updated_at = NOW()
            "#,
        )
        .bind(&client.client_id)
        .bind(client.network)
        .bind(&client.client_type)
        .bind(&client.chain_id)
        .bind(client.latest_height)
        .bind(client.frozen)
        .bind(client.connection_count)
        .bind(client.last_update)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert client {}", client.client_id))?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str, network: Network) -> Result<Option<ClientRecord>> {
        sqlx::query_as::<_, ClientRecord>(
            r#"SELECT client_id, network, client_type, chain_id, latest_height,
                      frozen, connection_count, last_update, created_at, updated_at
               FROM ibc_clients WHERE client_id = $1 AND network = $2"#,
        )
        .bind(client_id)
        .bind(network)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get client")
    }

    async fn upsert_connection(&self, connection: &ConnectionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_connections (connection_id, network, client_id,
                counterparty_connection_id, counterparty_client_id,
                counterparty_chain_id, state, delay_period, channel_count,
                last_activity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (connection_id, network) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                counterparty_connection_id = EXCLUDED.counterparty_connection_id,
                counterparty_client_id = EXCLUDED.counterparty_client_id,
                counterparty_chain_id = EXCLUDED.counterparty_chain_id,
                state = EXCLUDED.state,
                delay_period = EXCLUDED.delay_period,
                channel_count = EXCLUDED.channel_count,
                last_activity = EXCLUDED.last_activity,
                updated_at = NOW()
            "#,
        )
        .bind(&connection.connection_id)
        .bind(connection.network)
        .bind(&connection.client_id)
        .bind(&connection.counterparty_connection_id)
        .bind(&connection.counterparty_client_id)
        .bind(&connection.counterparty_chain_id)
        .bind(connection.state)
        .bind(connection.delay_period)
        .bind(connection.channel_count)
        .bind(connection.last_activity)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert connection {}", connection.connection_id))?;
        Ok(())
    }

    async fn get_connection(
        &self,
        connection_id: &str,
        network: Network,
    ) -> Result<Option<ConnectionRecord>> {
        sqlx::query_as::<_, ConnectionRecord>(
            r#"SELECT connection_id, network, client_id, counterparty_connection_id,
                      counterparty_client_id, counterparty_chain_id, state,
                      delay_period, channel_count, last_activity, created_at, updated_at
               FROM ibc_connections WHERE connection_id = $1 AND network = $2"#,
        )
        .bind(connection_id)
        .bind(network)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get connection")
    }

    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_channels (channel_id, port_id, network, connection_id,
                counterparty_channel_id, counterparty_port_id, state, ordering,
                version, packet_count, success_count, failure_count, timeout_count,
                avg_completion_time_ms, total_tokens_transferred, active_relayers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (channel_id, port_id, network) DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                counterparty_channel_id = EXCLUDED.counterparty_channel_id,
                counterparty_port_id = EXCLUDED.counterparty_port_id,
                state = EXCLUDED.state,
                ordering = EXCLUDED.ordering,
                version = EXCLUDED.version,
                packet_count = EXCLUDED.packet_count,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                timeout_count = EXCLUDED.timeout_count,
                avg_completion_time_ms = EXCLUDED.avg_completion_time_ms,
                total_tokens_transferred = EXCLUDED.total_tokens_transferred,
                active_relayers = EXCLUDED.active_relayers,
                updated_at = NOW()
            "#,
        )
        .bind(&channel.channel_id)
        .bind(&channel.port_id)
        .bind(channel.network)
        .bind(&channel.connection_id)
        .bind(&channel.counterparty_channel_id)
        .bind(&channel.counterparty_port_id)
        .bind(channel.state)
        .bind(channel.ordering)
        .bind(&channel.version)
        .bind(channel.packet_count)
        .bind(channel.success_count)
        .bind(channel.failure_count)
        .bind(channel.timeout_count)
        .bind(channel.avg_completion_time_ms)
        .bind(serde_json::to_value(&channel.total_tokens_transferred)?)
        .bind(serde_json::to_value(&channel.active_relayers)?)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert channel {}", channel.channel_id))?;
        Ok(())
    }

    async fn get_channel(
        &self,
        channel_id: &str,
        port_id: &str,
        network: Network,
    ) -> Result<Option<ChannelRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_channels WHERE channel_id = $1 AND port_id = $2 AND network = $3",
            CHANNEL_SELECT
        );
        sqlx::query_as::<_, ChannelRecord>(&query)
            .bind(channel_id)
            .bind(port_id)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get channel")
    }

    async fn upsert_packet(&self, packet: &PacketRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_packets (packet_id, sequence, source_port,
                source_channel, destination_port, destination_channel, network,
                data_hex, timeout_revision_number, timeout_revision_height,
                timeout_timestamp, status, send_tx_hash, send_timestamp,
                receive_tx_hash, receive_timestamp, ack_tx_hash, ack_timestamp,
                timeout_tx_hash, timeout_timestamp_observed, relayer_address,
                completion_time_ms, source_chain_id, destination_chain_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT (sequence, source_port, source_channel, destination_port,
                         destination_channel, network) DO UPDATE SET
                packet_id = EXCLUDED.packet_id,
                data_hex = COALESCE(EXCLUDED.data_hex, ibc_packets.data_hex),
                timeout_revision_number = EXCLUDED.timeout_revision_number,
                timeout_revision_height = EXCLUDED.timeout_revision_height,
                timeout_timestamp = COALESCE(EXCLUDED.timeout_timestamp, ibc_packets.timeout_timestamp),
                status = EXCLUDED.status,
                send_tx_hash = COALESCE(EXCLUDED.send_tx_hash, ibc_packets.send_tx_hash),
                send_timestamp = COALESCE(EXCLUDED.send_timestamp, ibc_packets.send_timestamp),
                receive_tx_hash = COALESCE(EXCLUDED.receive_tx_hash, ibc_packets.receive_tx_hash),
                receive_timestamp = COALESCE(EXCLUDED.receive_timestamp, ibc_packets.receive_timestamp),
                ack_tx_hash = COALESCE(EXCLUDED.ack_tx_hash, ibc_packets.ack_tx_hash),
                ack_timestamp = COALESCE(EXCLUDED.ack_timestamp, ibc_packets.ack_timestamp),
                timeout_tx_hash = COALESCE(EXCLUDED.timeout_tx_hash, ibc_packets.timeout_tx_hash),
                timeout_timestamp_observed = COALESCE(EXCLUDED.timeout_timestamp_observed, ibc_packets.timeout_timestamp_observed),
                relayer_address = COALESCE(EXCLUDED.relayer_address, ibc_packets.relayer_address),
                completion_time_ms = COALESCE(EXCLUDED.completion_time_ms, ibc_packets.completion_time_ms),
                source_chain_id = COALESCE(EXCLUDED.source_chain_id, ibc_packets.source_chain_id),
                destination_chain_id = COALESCE(EXCLUDED.destination_chain_id, ibc_packets.destination_chain_id),
                updated_at = NOW()
            "#,
        )
        .bind(&packet.packet_id)
        .bind(packet.sequence)
        .bind(&packet.source_port)
        .bind(&packet.source_channel)
        .bind(&packet.destination_port)
        .bind(&packet.destination_channel)
        .bind(packet.network)
        .bind(&packet.data_hex)
        .bind(packet.timeout_revision_number)
        .bind(packet.timeout_revision_height)
        .bind(&packet.timeout_timestamp)
        .bind(packet.status)
        .bind(&packet.send_tx_hash)
        .bind(packet.send_timestamp)
        .bind(&packet.receive_tx_hash)
        .bind(packet.receive_timestamp)
        .bind(&packet.ack_tx_hash)
        .bind(packet.ack_timestamp)
        .bind(&packet.timeout_tx_hash)
        .bind(packet.timeout_timestamp_observed)
        .bind(&packet.relayer_address)
        .bind(packet.completion_time_ms)
        .bind(&packet.source_chain_id)
        .bind(&packet.destination_chain_id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to upsert packet {}/{} seq {}",
                packet.source_port, packet.source_channel, packet.sequence
            )
        })?;
        Ok(())
    }

    async fn get_packet(
        &self,
        packet_id: &str,
        network: Network,
    ) -> Result<Option<PacketRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_packets WHERE packet_id = $1 AND network = $2",
            PACKET_SELECT
        );
        sqlx::query_as::<_, PacketRecord>(&query)
            .bind(packet_id)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get packet")
    }

    async fn upsert_transfer(&self, transfer: &TransferRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_transfers (packet_id, network, status, sequence,
                sender, receiver, amount, denom, memo, success, error,
                token_symbol, token_display_amount, source_chain_id,
                source_chain_name, destination_chain_id, destination_chain_name,
                source_channel_id, destination_channel_id, tx_hash, send_time,
                complete_time, completion_tx_hash, completion_height,
                completion_timestamp, timeout_tx_hash, timeout_height,
                timeout_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26,
                    $27, $28)
            ON CONFLICT (packet_id, network) DO UPDATE SET
                status = EXCLUDED.status,
                sender = EXCLUDED.sender,
                receiver = EXCLUDED.receiver,
                amount = EXCLUDED.amount,
                denom = EXCLUDED.denom,
                memo = COALESCE(EXCLUDED.memo, ibc_transfers.memo),
                success = EXCLUDED.success,
                error = EXCLUDED.error,
                token_symbol = COALESCE(EXCLUDED.token_symbol, ibc_transfers.token_symbol),
                token_display_amount = COALESCE(EXCLUDED.token_display_amount, ibc_transfers.token_display_amount),
                source_chain_id = EXCLUDED.source_chain_id,
                source_chain_name = EXCLUDED.source_chain_name,
                destination_chain_id = EXCLUDED.destination_chain_id,
                destination_chain_name = EXCLUDED.destination_chain_name,
                source_channel_id = EXCLUDED.source_channel_id,
                destination_channel_id = EXCLUDED.destination_channel_id,
                tx_hash = EXCLUDED.tx_hash,
                send_time = COALESCE(EXCLUDED.send_time, ibc_transfers.send_time),
                complete_time = COALESCE(EXCLUDED.complete_time, ibc_transfers.complete_time),
                completion_tx_hash = COALESCE(EXCLUDED.completion_tx_hash, ibc_transfers.completion_tx_hash),
                completion_height = COALESCE(EXCLUDED.completion_height, ibc_transfers.completion_height),
                completion_timestamp = COALESCE(EXCLUDED.completion_timestamp, ibc_transfers.completion_timestamp),
                timeout_tx_hash = COALESCE(EXCLUDED.timeout_tx_hash, ibc_transfers.timeout_tx_hash),
                timeout_height = COALESCE(EXCLUDED.timeout_height, ibc_transfers.timeout_height),
                timeout_timestamp = COALESCE(EXCLUDED.timeout_timestamp, ibc_transfers.timeout_timestamp),
                updated_at = NOW()
            "#,
        )
        .bind(&transfer.packet_id)
        .bind(transfer.network)
        .bind(transfer.status)
        .bind(transfer.sequence)
        .bind(&transfer.sender)
        .bind(&transfer.receiver)
        .bind(&transfer.amount)
        .bind(&transfer.denom)
        .bind(&transfer.memo)
        .bind(transfer.success)
        .bind(&transfer.error)
        .bind(&transfer.token_symbol)
        .bind(&transfer.token_display_amount)
        .bind(&transfer.source_chain_id)
        .bind(&transfer.source_chain_name)
        .bind(&transfer.destination_chain_id)
        .bind(&transfer.destination_chain_name)
        .bind(&transfer.source_channel_id)
        .bind(&transfer.destination_channel_id)
        .bind(&transfer.tx_hash)
        .bind(transfer.send_time)
        .bind(transfer.complete_time)
        .bind(&transfer.completion_tx_hash)
        .bind(transfer.completion_height)
        .bind(transfer.completion_timestamp)
        .bind(&transfer.timeout_tx_hash)
        .bind(transfer.timeout_height)
        .bind(transfer.timeout_timestamp)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert transfer {}", transfer.packet_id))?;
        Ok(())
    }

    async fn get_transfer_by_packet_id(
        &self,
        packet_id: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_transfers WHERE packet_id = $1 AND network = $2",
            TRANSFER_SELECT
        );
        sqlx::query_as::<_, TransferRecord>(&query)
            .bind(packet_id)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get transfer by packet id")
    }

    async fn get_transfer_by_tx_hash(
        &self,
        tx_hash: &str,
        network: Network,
    ) -> Result<Option<TransferRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_transfers
             WHERE tx_hash = $1 AND network = $2
             ORDER BY created_at DESC
             LIMIT 1",
            TRANSFER_SELECT
        );
        sqlx::query_as::<_, TransferRecord>(&query)
            .bind(tx_hash)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get transfer by tx hash")
    }

    async fn upsert_relayer(&self, relayer: &RelayerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_relayers (address, network, total_packets,
                successful_packets, failed_packets, avg_relay_time_ms,
                volumes_by_chain, volumes_by_denom, active_channels,
                chains_served)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (address, network) DO UPDATE SET
                total_packets = EXCLUDED.total_packets,
                successful_packets = EXCLUDED.successful_packets,
                failed_packets = EXCLUDED.failed_packets,
                avg_relay_time_ms = EXCLUDED.avg_relay_time_ms,
                volumes_by_chain = EXCLUDED.volumes_by_chain,
                volumes_by_denom = EXCLUDED.volumes_by_denom,
                active_channels = EXCLUDED.active_channels,
                chains_served = EXCLUDED.chains_served,
                updated_at = NOW()
            "#,
        )
        .bind(&relayer.address)
        .bind(relayer.network)
        .bind(relayer.total_packets)
        .bind(relayer.successful_packets)
        .bind(relayer.failed_packets)
        .bind(relayer.avg_relay_time_ms)
        .bind(serde_json::to_value(&relayer.volumes_by_chain)?)
        .bind(serde_json::to_value(&relayer.volumes_by_denom)?)
        .bind(serde_json::to_value(&relayer.active_channels)?)
        .bind(serde_json::to_value(&relayer.chains_served)?)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert relayer {}", relayer.address))?;
        Ok(())
    }

    async fn get_relayer(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Option<RelayerRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_relayers WHERE address = $1 AND network = $2",
            RELAYER_SELECT
        );
        sqlx::query_as::<_, RelayerRecord>(&query)
            .bind(address)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get relayer")
    }

    async fn upsert_metric_sample(&self, sample: &MetricSampleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ibc_metrics (metric_type, reference_id, timestamp,
                period, network, packet_count, success_count, failure_count,
                timeout_count, avg_completion_time_ms, volumes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (metric_type, reference_id, timestamp, period, network)
            DO UPDATE SET
                packet_count = EXCLUDED.packet_count,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                timeout_count = EXCLUDED.timeout_count,
                avg_completion_time_ms = EXCLUDED.avg_completion_time_ms,
                volumes = EXCLUDED.volumes,
                updated_at = NOW()
            "#,
        )
        .bind(sample.metric_type)
        .bind(&sample.reference_id)
        .bind(sample.timestamp)
        .bind(sample.period)
        .bind(sample.network)
        .bind(sample.packet_count)
        .bind(sample.success_count)
        .bind(sample.failure_count)
        .bind(sample.timeout_count)
        .bind(sample.avg_completion_time_ms)
        .bind(serde_json::to_value(&sample.volumes)?)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to upsert metric sample {}", sample.reference_id))?;
        Ok(())
    }

    async fn get_metric_sample(
        &self,
        metric_type: MetricType,
        reference_id: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        period: MetricPeriod,
        network: Network,
    ) -> Result<Option<MetricSampleRecord>> {
        let query = format!(
            "SELECT {} FROM ibc_metrics
             WHERE metric_type = $1 AND reference_id = $2 AND timestamp = $3
               AND period = $4 AND network = $5",
            METRIC_SELECT
        );
        sqlx::query_as::<_, MetricSampleRecord>(&query)
            .bind(metric_type)
            .bind(reference_id)
            .bind(timestamp)
            .bind(period)
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get metric sample")
    }

    async fn get_ingest_cursor(&self, network: Network) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT last_processed_height FROM ingest_cursors WHERE network = $1"#,
        )
        .bind(network)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get ingest cursor")?;
        Ok(row.map(|r| r.0))
    }

    async fn set_ingest_cursor(&self, network: Network, height: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_cursors (network, last_processed_height)
            VALUES ($1, $2)
            ON CONFLICT (network) DO UPDATE SET
                last_processed_height = $2, updated_at = NOW()
            "#,
        )
        .bind(network)
        .bind(height)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update ingest cursor for {}", network))?;
        Ok(())
    }
}
