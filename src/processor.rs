//! IBC event processor.
//!
//! Consumes `(event, tx context)` tuples and drives the packet/transfer
//! state machine: send and recv create transfers, acknowledgements and
//! timeouts terminate them, fungible-token events enrich in place. Handshake
//! events maintain the client/connection/channel graph the resolver walks.
//! Terminal transitions feed the channel, relayer and metric rollups.

use chrono::{DateTime, Timelike, Utc};
use eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::models::{
    add_amounts, running_average, ChannelRecord, ClientRecord, ConnectionRecord,
    MetricSampleRecord, PacketRecord, RelayerRecord, TransferRecord, VolumeEntry,
};
use crate::db::IbcStore;
use crate::metrics;
use crate::packet::{flatten_attributes, handle_packet_event, PacketInfo, TxContextMap};
use crate::resolver::ChainResolver;
use crate::token_format::{extract_token_symbol, format_token_amount, parse_transfer_data_str, TransferData};
use crate::transfer_status::{
    acknowledgement_error, apply_acknowledgement, apply_timeout, is_successful_acknowledgement,
};
use crate::types::{
    ChannelOrdering, ChannelState, ConnectionState, EventContext, IbcEvent, MetricPeriod,
    MetricType, PacketStatus, TransferStatus,
};

/// Fallback chain id when a remote side cannot be resolved from local state.
const EXTERNAL_CHAIN: &str = "external-chain";

/// How a transfer terminated, for analytics rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

pub struct EventProcessor {
    store: Arc<dyn IbcStore>,
    resolver: ChainResolver,
    tx_context: Mutex<TxContextMap>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn IbcStore>, resolver: ChainResolver) -> Self {
        EventProcessor {
            store,
            resolver,
            tx_context: Mutex::new(TxContextMap::new()),
        }
    }

    /// Process one event. Errors are scoped to this event; the caller keeps
    /// the stream going.
    pub async fn process_event(&self, event: &IbcEvent, ctx: &EventContext) -> Result<()> {
        let attrs = flatten_attributes(&event.attributes);
        metrics::record_event(ctx.network.as_str(), &event.event_type);

        match event.event_type.as_str() {
            "send_packet" | "recv_packet" => {
                self.handle_packet_origin(&event.event_type, &attrs, ctx).await
            }
            "acknowledge_packet" => self.handle_acknowledgement(&event.event_type, &attrs, ctx).await,
            "write_acknowledgement" => self.handle_write_acknowledgement(&attrs, ctx).await,
            "timeout_packet" => self.handle_timeout(&event.event_type, &attrs, ctx).await,
            "fungible_token_packet" | "transfer_packet" => {
                self.handle_fungible_enrichment(&attrs, ctx).await
            }
            "create_client" | "update_client" => self.handle_client_event(&attrs, ctx).await,
            "connection_open_init" | "connection_open_try" | "connection_open_ack"
            | "connection_open_confirm" => {
                self.handle_connection_event(&event.event_type, &attrs, ctx).await
            }
            "channel_open_init" | "channel_open_try" | "channel_open_ack"
            | "channel_open_confirm" | "channel_close_init" | "channel_close_confirm" => {
                self.handle_channel_event(&event.event_type, &attrs, ctx).await
            }
            other => {
                debug!(event_type = %other, "Ignoring unrecognized event type");
                Ok(())
            }
        }
    }

    /// send_packet / recv_packet: create the packet row and its transfer.
    async fn handle_packet_origin(
        &self,
        event_type: &str,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let info = {
            let mut context = self.tx_context.lock().await;
            handle_packet_event(event_type, attrs, &ctx.tx_hash, &mut context)
        };
        let Some(info) = info else {
            warn!(
                %event_type,
                tx_hash = %ctx.tx_hash,
                "Packet event missing routing attributes, dropping"
            );
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let is_send = event_type == "send_packet";

        let mut chain_info = self
            .resolver
            .transfer_chain_info(
                event_type,
                &info.source_channel,
                &info.source_port,
                &info.destination_channel,
                &info.destination_port,
                ctx.network,
            )
            .await?;

        if chain_info.source_chain_id.is_empty() {
            chain_info.source_chain_id = EXTERNAL_CHAIN.to_string();
            chain_info.source_chain_name = EXTERNAL_CHAIN.to_string();
        }
        if chain_info.destination_chain_id.is_empty() {
            chain_info.destination_chain_id = EXTERNAL_CHAIN.to_string();
            chain_info.destination_chain_name = EXTERNAL_CHAIN.to_string();
        }

        let transfer_data = info.data.as_deref().and_then(|raw| {
            parse_transfer_data_str(raw)
                .map_err(|e| {
                    warn!(tx_hash = %ctx.tx_hash, error = %e, "Unparseable packet data");
                })
                .ok()
        });
        let data = transfer_data.unwrap_or_else(|| TransferData {
            sender: String::new(),
            receiver: String::new(),
            denom: String::new(),
            amount: String::new(),
            memo: None,
        });

        let token_symbol = if data.denom.is_empty() {
            None
        } else {
            Some(extract_token_symbol(&data.denom))
        };
        let token_display_amount = token_symbol
            .as_deref()
            .and_then(|symbol| format_token_amount(&data.amount, symbol).ok());

        let packet_id = info.packet_id();
        let now = ctx.block_timestamp;

        let packet = PacketRecord {
            packet_id: packet_id.clone(),
            sequence: info.sequence as i64,
            source_port: info.source_port.clone(),
            source_channel: info.source_channel.clone(),
            destination_port: info.destination_port.clone(),
            destination_channel: info.destination_channel.clone(),
            network: ctx.network,
            data_hex: info.data.as_ref().map(|d| hex::encode(d.as_bytes())),
            timeout_revision_number: info
                .timeout_height
                .map(|h| h.revision_number as i64)
                .unwrap_or(0),
            timeout_revision_height: info
                .timeout_height
                .map(|h| h.revision_height as i64)
                .unwrap_or(0),
            timeout_timestamp: info.timeout_timestamp.clone(),
            status: if is_send {
                PacketStatus::Sent
            } else {
                PacketStatus::Received
            },
            send_tx_hash: is_send.then(|| ctx.tx_hash.clone()),
            send_timestamp: is_send.then_some(now),
            receive_tx_hash: (!is_send).then(|| ctx.tx_hash.clone()),
            receive_timestamp: (!is_send).then_some(now),
            ack_tx_hash: None,
            ack_timestamp: None,
            timeout_tx_hash: None,
            timeout_timestamp_observed: None,
            relayer_address: relayer_address(attrs),
            completion_time_ms: None,
            source_chain_id: Some(chain_info.source_chain_id.clone()),
            destination_chain_id: Some(chain_info.destination_chain_id.clone()),
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_packet(&packet).await?;

        let transfer = TransferRecord {
            packet_id: packet_id.clone(),
            network: ctx.network,
            status: if is_send {
                TransferStatus::Pending
            } else {
                TransferStatus::Received
            },
            sequence: info.sequence as i64,
            sender: data.sender,
            receiver: data.receiver,
            amount: data.amount,
            denom: data.denom,
            memo: data.memo,
            success: false,
            error: None,
            token_symbol,
            token_display_amount,
            source_chain_id: chain_info.source_chain_id,
            source_chain_name: chain_info.source_chain_name,
            destination_chain_id: chain_info.destination_chain_id,
            destination_chain_name: chain_info.destination_chain_name,
            source_channel_id: info.source_channel.clone(),
            destination_channel_id: info.destination_channel.clone(),
            tx_hash: ctx.tx_hash.clone(),
            send_time: is_send.then_some(now),
            complete_time: None,
            completion_tx_hash: None,
            completion_height: None,
            completion_timestamp: None,
            timeout_tx_hash: None,
            timeout_height: None,
            timeout_timestamp: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_transfer(&transfer).await?;

        metrics::record_transfer(
            ctx.network.as_str(),
            if is_send { "pending" } else { "received" },
        );

        // Rollups go to the channel this chain owns: the source side for
        // outbound packets, the destination side for inbound ones.
        let (local_channel, local_port) = if is_send {
            (&info.source_channel, &info.source_port)
        } else {
            (&info.destination_channel, &info.destination_port)
        };
        self.bump_channel_on_origin(local_channel, local_port, &transfer, ctx)
            .await?;

        Ok(())
    }

    /// acknowledge_packet: terminal transition on the source side.
    async fn handle_acknowledgement(
        &self,
        event_type: &str,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let info = {
            let mut context = self.tx_context.lock().await;
            handle_packet_event(event_type, attrs, &ctx.tx_hash, &mut context)
        };
        let Some(info) = info else {
            warn!(tx_hash = %ctx.tx_hash, "Acknowledgement missing routing attributes, dropping");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let ok = is_successful_acknowledgement(attrs);
        let error = if ok { None } else { acknowledgement_error(attrs) };
        let packet_id = info.packet_id();
        let relayer = relayer_address(attrs);

        let completion_ms = self
            .finalize_packet(&info, &packet_id, PacketStatus::Acknowledged, relayer.as_deref(), ctx)
            .await?;

        let Some(transfer) = self
            .store
            .get_transfer_by_packet_id(&packet_id, ctx.network)
            .await?
        else {
            debug!(%packet_id, "No transfer for acknowledgement");
            return Ok(());
        };

        let updated = apply_acknowledgement(
            &transfer,
            &ctx.tx_hash,
            ctx.height,
            ctx.block_timestamp,
            ok,
            error,
        );
        self.store.upsert_transfer(&updated).await?;

        let outcome = if ok { Outcome::Success } else { Outcome::Failure };
        metrics::record_transfer(
            ctx.network.as_str(),
            if ok { "completed" } else { "failed" },
        );
        self.record_terminal_analytics(
            &info.source_channel,
            &info.source_port,
            &updated,
            relayer.as_deref(),
            completion_ms,
            outcome,
            ctx,
        )
        .await?;

        Ok(())
    }

    /// write_acknowledgement: destination-side acknowledgement observation.
    /// Promotes a RECEIVED transfer with the same success oracle, stamps the
    /// packet row and feeds the terminal rollups against the local
    /// (destination) channel.
    async fn handle_write_acknowledgement(
        &self,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let Some(info) = crate::packet::extract_packet_info("write_acknowledgement", attrs) else {
            warn!(tx_hash = %ctx.tx_hash, "write_acknowledgement missing routing attributes");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let packet_id = info.packet_id();
        let relayer = relayer_address(attrs);

        let completion_ms = self
            .finalize_packet(&info, &packet_id, PacketStatus::Acknowledged, relayer.as_deref(), ctx)
            .await?;

        let Some(transfer) = self
            .store
            .get_transfer_by_packet_id(&packet_id, ctx.network)
            .await?
        else {
            debug!(%packet_id, "No transfer for write_acknowledgement");
            return Ok(());
        };

        if transfer.status != TransferStatus::Received {
            debug!(%packet_id, status = ?transfer.status, "write_acknowledgement on non-received transfer, ignoring");
            return Ok(());
        }

        let ok = is_successful_acknowledgement(attrs);
        let error = if ok { None } else { acknowledgement_error(attrs) };
        let updated = apply_acknowledgement(
            &transfer,
            &ctx.tx_hash,
            ctx.height,
            ctx.block_timestamp,
            ok,
            error,
        );
        self.store.upsert_transfer(&updated).await?;

        let outcome = if ok { Outcome::Success } else { Outcome::Failure };
        metrics::record_transfer(
            ctx.network.as_str(),
            if ok { "completed" } else { "failed" },
        );
        self.record_terminal_analytics(
            &info.destination_channel,
            &info.destination_port,
            &updated,
            relayer.as_deref(),
            completion_ms,
            outcome,
            ctx,
        )
        .await?;

        Ok(())
    }

    /// timeout_packet: terminal transition on the source side.
    async fn handle_timeout(
        &self,
        event_type: &str,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let info = {
            let mut context = self.tx_context.lock().await;
            handle_packet_event(event_type, attrs, &ctx.tx_hash, &mut context)
        };
        let Some(info) = info else {
            warn!(tx_hash = %ctx.tx_hash, "Timeout missing routing attributes, dropping");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let packet_id = info.packet_id();
        let relayer = relayer_address(attrs);
        let completion_ms = self
            .finalize_packet(&info, &packet_id, PacketStatus::Timeout, relayer.as_deref(), ctx)
            .await?;

        let Some(transfer) = self
            .store
            .get_transfer_by_packet_id(&packet_id, ctx.network)
            .await?
        else {
            debug!(%packet_id, "No transfer for timeout");
            return Ok(());
        };

        let updated = apply_timeout(&transfer, &ctx.tx_hash, ctx.height, ctx.block_timestamp);
        self.store.upsert_transfer(&updated).await?;

        metrics::record_transfer(ctx.network.as_str(), "timeout");
        self.record_terminal_analytics(
            &info.source_channel,
            &info.source_port,
            &updated,
            relayer.as_deref(),
            completion_ms,
            Outcome::Timeout,
            ctx,
        )
        .await?;

        Ok(())
    }

    /// fungible_token_packet / transfer_packet: supplementary enrichment of
    /// the transfer created earlier in the same transaction. Never creates.
    async fn handle_fungible_enrichment(
        &self,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let mut found = self
            .store
            .get_transfer_by_tx_hash(&ctx.tx_hash, ctx.network)
            .await?;

        if found.is_none() {
            // The event may carry (or inherit, via the per-transaction
            // context) enough identity to reach the transfer directly.
            let info = {
                let mut context = self.tx_context.lock().await;
                handle_packet_event("fungible_token_packet", attrs, &ctx.tx_hash, &mut context)
            };
            if let Some(info) = info {
                found = self
                    .store
                    .get_transfer_by_packet_id(&info.packet_id(), ctx.network)
                    .await?;
            }
        }

        let Some(mut transfer) = found else {
            debug!(tx_hash = %ctx.tx_hash, "No transfer to enrich, skipping token packet event");
            metrics::record_event_dropped(ctx.network.as_str(), "uncorrelated_token_packet");
            return Ok(());
        };

        if let Some(denom) = attrs.get("denom") {
            transfer.denom = denom.clone();
            let symbol = extract_token_symbol(denom);
            transfer.token_display_amount =
                format_token_amount(&transfer.amount, &symbol).ok();
            transfer.token_symbol = Some(symbol);
        }
        if let Some(amount) = attrs.get("amount") {
            transfer.amount = amount.clone();
            if let Some(symbol) = transfer.token_symbol.as_deref() {
                transfer.token_display_amount = format_token_amount(amount, symbol).ok();
            }
        }
        if let Some(sender) = attrs.get("sender") {
            transfer.sender = sender.clone();
        }
        if let Some(receiver) = attrs.get("receiver") {
            transfer.receiver = receiver.clone();
        }
        if let Some(memo) = attrs.get("memo") {
            if !memo.is_empty() {
                transfer.memo = Some(memo.clone());
            }
        }

        if let Some(success) = attrs.get("success") {
            let ok = success == "true" || success == "\u{1}";
            transfer.success = ok;
            if ok {
                transfer.status = TransferStatus::Completed;
            }
        }

        transfer.updated_at = ctx.block_timestamp;
        self.store.upsert_transfer(&transfer).await?;
        Ok(())
    }

    /// create_client / update_client: track the counterparty light client.
    async fn handle_client_event(
        &self,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let Some(client_id) = attrs.get("client_id") else {
            warn!(tx_hash = %ctx.tx_hash, "Client event missing client_id, dropping");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let existing = self.store.get_client(client_id, ctx.network).await?;
        let latest_height = attrs
            .get("consensus_height")
            .or_else(|| attrs.get("consensus_heights"))
            .and_then(|h| h.rsplit('-').next())
            .and_then(|h| h.parse::<i64>().ok());

        let record = match existing {
            Some(mut client) => {
                if let Some(height) = latest_height {
                    client.latest_height = height;
                }
                if let Some(chain_id) = attrs.get("chain_id") {
                    client.chain_id = chain_id.clone();
                }
                client.last_update = ctx.block_timestamp;
                client
            }
            None => ClientRecord {
                client_id: client_id.clone(),
                network: ctx.network,
                client_type: attrs.get("client_type").cloned().unwrap_or_default(),
                chain_id: attrs.get("chain_id").cloned().unwrap_or_default(),
                latest_height: latest_height.unwrap_or(0),
                frozen: false,
                connection_count: 0,
                last_update: ctx.block_timestamp,
                created_at: ctx.block_timestamp,
                updated_at: ctx.block_timestamp,
            },
        };
        self.store.upsert_client(&record).await
    }

    /// Connection handshake: create on init/try, open on ack/confirm.
    async fn handle_connection_event(
        &self,
        event_type: &str,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let Some(connection_id) = attrs.get("connection_id") else {
            warn!(tx_hash = %ctx.tx_hash, "Connection event missing connection_id, dropping");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let state = match event_type {
            "connection_open_init" => ConnectionState::Init,
            "connection_open_try" => ConnectionState::Tryopen,
            _ => ConnectionState::Open,
        };

        let existing = self.store.get_connection(connection_id, ctx.network).await?;
        let client_id = attrs
            .get("client_id")
            .cloned()
            .or_else(|| existing.as_ref().map(|c| c.client_id.clone()))
            .unwrap_or_default();

        let counterparty_chain_id = match self.store.get_client(&client_id, ctx.network).await? {
            Some(client) => client.chain_id,
            None => existing
                .as_ref()
                .map(|c| c.counterparty_chain_id.clone())
                .unwrap_or_default(),
        };

        let is_new = existing.is_none();
        let record = ConnectionRecord {
            connection_id: connection_id.clone(),
            network: ctx.network,
            counterparty_connection_id: attrs
                .get("counterparty_connection_id")
                .cloned()
                .or_else(|| existing.as_ref().map(|c| c.counterparty_connection_id.clone()))
                .unwrap_or_default(),
            counterparty_client_id: attrs
                .get("counterparty_client_id")
                .cloned()
                .or_else(|| existing.as_ref().map(|c| c.counterparty_client_id.clone()))
                .unwrap_or_default(),
            counterparty_chain_id,
            state,
            delay_period: existing.as_ref().map(|c| c.delay_period).unwrap_or(0),
            channel_count: existing.as_ref().map(|c| c.channel_count).unwrap_or(0),
            last_activity: ctx.block_timestamp,
            created_at: existing
                .as_ref()
                .map(|c| c.created_at)
                .unwrap_or(ctx.block_timestamp),
            updated_at: ctx.block_timestamp,
            client_id: client_id.clone(),
        };
        self.store.upsert_connection(&record).await?;

        if is_new && !client_id.is_empty() {
            if let Some(mut client) = self.store.get_client(&client_id, ctx.network).await? {
                client.connection_count += 1;
                client.last_update = ctx.block_timestamp;
                self.store.upsert_client(&client).await?;
            }
        }

        Ok(())
    }

    /// Channel handshake and close events.
    async fn handle_channel_event(
        &self,
        event_type: &str,
        attrs: &HashMap<String, String>,
        ctx: &EventContext,
    ) -> Result<()> {
        let (Some(channel_id), Some(port_id)) = (attrs.get("channel_id"), attrs.get("port_id"))
        else {
            warn!(tx_hash = %ctx.tx_hash, "Channel event missing channel/port id, dropping");
            metrics::record_event_dropped(ctx.network.as_str(), "missing_attributes");
            return Ok(());
        };

        let state = match event_type {
            "channel_open_init" => ChannelState::Init,
            "channel_open_try" => ChannelState::Tryopen,
            "channel_close_init" | "channel_close_confirm" => ChannelState::Closed,
            _ => ChannelState::Open,
        };

        let existing = self
            .store
            .get_channel(channel_id, port_id, ctx.network)
            .await?;
        let connection_id = attrs
            .get("connection_id")
            .cloned()
            .or_else(|| existing.as_ref().map(|c| c.connection_id.clone()))
            .unwrap_or_default();

        let is_new = existing.is_none();
        let record = ChannelRecord {
            channel_id: channel_id.clone(),
            port_id: port_id.clone(),
            network: ctx.network,
            connection_id: connection_id.clone(),
            counterparty_channel_id: attrs
                .get("counterparty_channel_id")
                .cloned()
                .or_else(|| existing.as_ref().map(|c| c.counterparty_channel_id.clone()))
                .unwrap_or_default(),
            counterparty_port_id: attrs
                .get("counterparty_port_id")
                .cloned()
                .or_else(|| existing.as_ref().map(|c| c.counterparty_port_id.clone()))
                .unwrap_or_default(),
            state,
            ordering: existing
                .as_ref()
                .map(|c| c.ordering)
                .unwrap_or(ChannelOrdering::Unordered),
            version: attrs
                .get("version")
                .cloned()
                .or_else(|| existing.as_ref().map(|c| c.version.clone()))
                .unwrap_or_default(),
            packet_count: existing.as_ref().map(|c| c.packet_count).unwrap_or(0),
            success_count: existing.as_ref().map(|c| c.success_count).unwrap_or(0),
            failure_count: existing.as_ref().map(|c| c.failure_count).unwrap_or(0),
            timeout_count: existing.as_ref().map(|c| c.timeout_count).unwrap_or(0),
            avg_completion_time_ms: existing
                .as_ref()
                .map(|c| c.avg_completion_time_ms)
                .unwrap_or(0.0),
            total_tokens_transferred: existing
                .as_ref()
                .map(|c| c.total_tokens_transferred.clone())
                .unwrap_or_default(),
            active_relayers: existing
                .as_ref()
                .map(|c| c.active_relayers.clone())
                .unwrap_or_default(),
            created_at: existing
                .as_ref()
                .map(|c| c.created_at)
                .unwrap_or(ctx.block_timestamp),
            updated_at: ctx.block_timestamp,
        };
        self.store.upsert_channel(&record).await?;

        if is_new && !connection_id.is_empty() {
            if let Some(mut connection) =
                self.store.get_connection(&connection_id, ctx.network).await?
            {
                connection.channel_count += 1;
                connection.last_activity = ctx.block_timestamp;
                self.store.upsert_connection(&connection).await?;
            }
        }

        Ok(())
    }

    /// Stamp the terminal side of the packet row and compute completion time
    /// when both ends are known.
    async fn finalize_packet(
        &self,
        info: &PacketInfo,
        packet_id: &str,
        status: PacketStatus,
        relayer: Option<&str>,
        ctx: &EventContext,
    ) -> Result<Option<i64>> {
        let existing = self.store.get_packet(packet_id, ctx.network).await?;
        let completion_ms = existing
            .as_ref()
            .and_then(|p| p.send_timestamp)
            .map(|send| (ctx.block_timestamp - send).num_milliseconds())
            .filter(|ms| *ms >= 0);

        let now = ctx.block_timestamp;
        let is_timeout = status == PacketStatus::Timeout;
        let packet = PacketRecord {
            packet_id: packet_id.to_string(),
            sequence: info.sequence as i64,
            source_port: info.source_port.clone(),
            source_channel: info.source_channel.clone(),
            destination_port: info.destination_port.clone(),
            destination_channel: info.destination_channel.clone(),
            network: ctx.network,
            data_hex: None,
            timeout_revision_number: existing
                .as_ref()
                .map(|p| p.timeout_revision_number)
                .unwrap_or(0),
            timeout_revision_height: existing
                .as_ref()
                .map(|p| p.timeout_revision_height)
                .unwrap_or(0),
            timeout_timestamp: None,
            status,
            send_tx_hash: None,
            send_timestamp: None,
            receive_tx_hash: None,
            receive_timestamp: None,
            ack_tx_hash: (!is_timeout).then(|| ctx.tx_hash.clone()),
            ack_timestamp: (!is_timeout).then_some(now),
            timeout_tx_hash: is_timeout.then(|| ctx.tx_hash.clone()),
            timeout_timestamp_observed: is_timeout.then_some(now),
            relayer_address: relayer.map(str::to_string),
            completion_time_ms: completion_ms,
            source_chain_id: None,
            destination_chain_id: None,
            created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.upsert_packet(&packet).await?;
        Ok(completion_ms)
    }

    /// Channel counters bumped on the local channel when a packet originates
    /// (send or recv).
    async fn bump_channel_on_origin(
        &self,
        channel_id: &str,
        port_id: &str,
        transfer: &TransferRecord,
        ctx: &EventContext,
    ) -> Result<()> {
        let Some(mut channel) = self
            .store
            .get_channel(channel_id, port_id, ctx.network)
            .await?
        else {
            return Ok(());
        };

        channel.packet_count += 1;
        if !transfer.denom.is_empty() && !transfer.amount.is_empty() {
            let total = channel
                .total_tokens_transferred
                .entry(transfer.denom.clone())
                .or_insert_with(|| "0".to_string());
            *total = add_amounts(total, &transfer.amount);
        }
        channel.updated_at = ctx.block_timestamp;
        self.store.upsert_channel(&channel).await
    }

    /// Terminal rollups against the local channel: outcome counters, relayer
    /// stats, hourly metric samples.
    async fn record_terminal_analytics(
        &self,
        channel_id: &str,
        port_id: &str,
        transfer: &TransferRecord,
        relayer: Option<&str>,
        completion_ms: Option<i64>,
        outcome: Outcome,
        ctx: &EventContext,
    ) -> Result<()> {
        if let Some(mut channel) = self
            .store
            .get_channel(channel_id, port_id, ctx.network)
            .await?
        {
            match outcome {
                Outcome::Success => channel.success_count += 1,
                Outcome::Failure => channel.failure_count += 1,
                Outcome::Timeout => channel.timeout_count += 1,
            }
            if let Some(ms) = completion_ms {
                let completed = channel.success_count + channel.failure_count;
                channel.avg_completion_time_ms =
                    running_average(channel.avg_completion_time_ms, completed, ms as f64);
            }
            if let Some(address) = relayer {
                if !channel.active_relayers.iter().any(|r| r == address) {
                    channel.active_relayers.push(address.to_string());
                }
            }
            channel.updated_at = ctx.block_timestamp;
            self.store.upsert_channel(&channel).await?;
        }

        if let Some(address) = relayer {
            self.bump_relayer_stats(address, channel_id, transfer, completion_ms, outcome, ctx)
                .await?;
            self.bump_metric_sample(
                MetricType::Relayer,
                address,
                transfer,
                completion_ms,
                outcome,
                ctx,
            )
            .await?;
        }

        self.bump_metric_sample(
            MetricType::Channel,
            channel_id,
            transfer,
            completion_ms,
            outcome,
            ctx,
        )
        .await?;

        Ok(())
    }

    async fn bump_relayer_stats(
        &self,
        address: &str,
        channel_id: &str,
        transfer: &TransferRecord,
        completion_ms: Option<i64>,
        outcome: Outcome,
        ctx: &EventContext,
    ) -> Result<()> {
        let mut relayer = self
            .store
            .get_relayer(address, ctx.network)
            .await?
            .unwrap_or_else(|| RelayerRecord {
                address: address.to_string(),
                network: ctx.network,
                total_packets: 0,
                successful_packets: 0,
                failed_packets: 0,
                avg_relay_time_ms: 0.0,
                volumes_by_chain: HashMap::new(),
                volumes_by_denom: HashMap::new(),
                active_channels: HashMap::new(),
                chains_served: Vec::new(),
                created_at: ctx.block_timestamp,
                updated_at: ctx.block_timestamp,
            });

        relayer.total_packets += 1;
        match outcome {
            Outcome::Success => relayer.successful_packets += 1,
            Outcome::Failure | Outcome::Timeout => relayer.failed_packets += 1,
        }
        if let Some(ms) = completion_ms {
            relayer.avg_relay_time_ms =
                running_average(relayer.avg_relay_time_ms, relayer.total_packets, ms as f64);
        }

        if !transfer.denom.is_empty() && !transfer.amount.is_empty() {
            let by_denom = relayer
                .volumes_by_denom
                .entry(transfer.denom.clone())
                .or_insert_with(|| "0".to_string());
            *by_denom = add_amounts(by_denom, &transfer.amount);

            let chain_id = &transfer.destination_chain_id;
            if !chain_id.is_empty() {
                let by_chain = relayer
                    .volumes_by_chain
                    .entry(chain_id.clone())
                    .or_default()
                    .entry(transfer.denom.clone())
                    .or_insert_with(|| "0".to_string());
                *by_chain = add_amounts(by_chain, &transfer.amount);
            }
        }

        let channel_entry = relayer
            .active_channels
            .entry(channel_id.to_string())
            .or_default();
        channel_entry.packet_count += 1;
        if !transfer.denom.is_empty() && !transfer.amount.is_empty() {
            let volume = channel_entry
                .volumes
                .entry(transfer.denom.clone())
                .or_insert_with(|| "0".to_string());
            *volume = add_amounts(volume, &transfer.amount);
        }

        for chain_id in [&transfer.source_chain_id, &transfer.destination_chain_id] {
            if !chain_id.is_empty() && !relayer.chains_served.iter().any(|c| c == chain_id) {
                relayer.chains_served.push(chain_id.clone());
            }
        }

        relayer.updated_at = ctx.block_timestamp;
        self.store.upsert_relayer(&relayer).await
    }

    async fn bump_metric_sample(
        &self,
        metric_type: MetricType,
        reference_id: &str,
        transfer: &TransferRecord,
        completion_ms: Option<i64>,
        outcome: Outcome,
        ctx: &EventContext,
    ) -> Result<()> {
        let bucket = hour_bucket(ctx.block_timestamp);
        let mut sample = self
            .store
            .get_metric_sample(metric_type, reference_id, bucket, MetricPeriod::Hourly, ctx.network)
            .await?
            .unwrap_or_else(|| MetricSampleRecord {
                metric_type,
                reference_id: reference_id.to_string(),
                timestamp: bucket,
                period: MetricPeriod::Hourly,
                network: ctx.network,
                packet_count: 0,
                success_count: 0,
                failure_count: 0,
                timeout_count: 0,
                avg_completion_time_ms: 0.0,
                volumes: Vec::new(),
                created_at: ctx.block_timestamp,
                updated_at: ctx.block_timestamp,
            });

        sample.packet_count += 1;
        match outcome {
            Outcome::Success => sample.success_count += 1,
            Outcome::Failure => sample.failure_count += 1,
            Outcome::Timeout => sample.timeout_count += 1,
        }
        if let Some(ms) = completion_ms {
            sample.avg_completion_time_ms =
                running_average(sample.avg_completion_time_ms, sample.packet_count, ms as f64);
        }
        if !transfer.denom.is_empty() && !transfer.amount.is_empty() {
            match sample.volumes.iter_mut().find(|v| v.denom == transfer.denom) {
                Some(entry) => entry.amount = add_amounts(&entry.amount, &transfer.amount),
                None => sample.volumes.push(VolumeEntry {
                    denom: transfer.denom.clone(),
                    amount: transfer.amount.clone(),
                }),
            }
        }
        sample.updated_at = ctx.block_timestamp;
        self.store.upsert_metric_sample(&sample).await
    }
}

/// Relayer address attached to an event, when the chain emits one.
fn relayer_address(attrs: &HashMap<String, String>) -> Option<String> {
    attrs
        .get("relayer")
        .or_else(|| attrs.get("signer"))
        .filter(|a| !a.is_empty())
        .cloned()
}

/// Truncate a timestamp to its hour for hourly metric buckets.
fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalChainConfig;
    use crate::db::memory::MemoryStore;
    use crate::types::Network;

    fn processor(store: Arc<MemoryStore>) -> EventProcessor {
        let resolver = ChainResolver::new(store.clone(), LocalChainConfig::default());
        EventProcessor::new(store, resolver)
    }

    fn ctx(tx_hash: &str, height: i64) -> EventContext {
        EventContext {
            tx_hash: tx_hash.to_string(),
            height,
            block_timestamp: Utc::now(),
            network: Network::Mainnet,
        }
    }

    #[tokio::test]
    async fn test_unknown_event_type_ignored() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let event = IbcEvent::new("coin_spent", vec![("spender", "bbn1x"), ("amount", "5ubbn")]);
        processor.process_event(&event, &ctx("TX1", 10)).await.unwrap();
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_send_dropped_without_error() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let event = IbcEvent::new("send_packet", vec![("packet_src_port", "transfer")]);
        processor.process_event(&event, &ctx("TX1", 10)).await.unwrap();
        assert_eq!(store.transfer_count().await, 0);
        assert_eq!(store.packet_count().await, 0);
    }

    #[tokio::test]
    async fn test_ack_without_transfer_is_quiet() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let event = IbcEvent::new(
            "acknowledge_packet",
            vec![
                ("packet_src_port", "transfer"),
                ("packet_src_channel", "channel-0"),
                ("packet_dst_port", "transfer"),
                ("packet_dst_channel", "channel-12"),
                ("packet_sequence", "7"),
                ("packet_ack", r#"{"result":"AQ=="}"#),
            ],
        );
        processor.process_event(&event, &ctx("TX1", 10)).await.unwrap();
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_client_create_and_update() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());

        let create = IbcEvent::new(
            "create_client",
            vec![
                ("client_id", "07-tendermint-0"),
                ("client_type", "07-tendermint"),
                ("consensus_height", "1-500"),
            ],
        );
        processor.process_event(&create, &ctx("TX1", 10)).await.unwrap();

        let client = store
            .get_client("07-tendermint-0", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.latest_height, 500);
        assert_eq!(client.client_type, "07-tendermint");

        let update = IbcEvent::new(
            "update_client",
            vec![
                ("client_id", "07-tendermint-0"),
                ("consensus_heights", "1-900"),
            ],
        );
        processor.process_event(&update, &ctx("TX2", 11)).await.unwrap();

        let client = store
            .get_client("07-tendermint-0", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.latest_height, 900);
    }

    #[tokio::test]
    async fn test_channel_handshake_progression() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());

        let init = IbcEvent::new(
            "channel_open_init",
            vec![
                ("channel_id", "channel-0"),
                ("port_id", "transfer"),
                ("connection_id", "connection-0"),
                ("counterparty_port_id", "transfer"),
                ("version", "ics20-1"),
            ],
        );
        processor.process_event(&init, &ctx("TX1", 10)).await.unwrap();

        let channel = store
            .get_channel("channel-0", "transfer", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel.state, ChannelState::Init);

        let ack = IbcEvent::new(
            "channel_open_ack",
            vec![
                ("channel_id", "channel-0"),
                ("port_id", "transfer"),
                ("counterparty_channel_id", "channel-7000"),
            ],
        );
        processor.process_event(&ack, &ctx("TX2", 11)).await.unwrap();

        let channel = store
            .get_channel("channel-0", "transfer", Network::Mainnet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel.state, ChannelState::Open);
        assert_eq!(channel.counterparty_channel_id, "channel-7000");
        assert_eq!(channel.connection_id, "connection-0");
    }

    #[test]
    fn test_hour_bucket_truncates() {
        let ts = Utc::now();
        let bucket = hour_bucket(ts);
        assert_eq!(bucket.minute(), 0);
        assert_eq!(bucket.second(), 0);
    }
}
