//! Read-only query client for a remote chain's LCD.
//!
//! Wraps the standard `/ibc/core/channel/v1` REST surface. A 404 is semantic
//! absence (no commitment, no acknowledgement), never an error; other
//! failures surface to the caller.

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RemoteRpcConfig;
use crate::packet::{extract_packet_info, flatten_attributes, PacketInfo};
use crate::types::{EventAttribute, IbcEvent};

#[derive(Debug, Deserialize)]
struct LatestBlockResponse {
    block: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelEnd {
    pub state: String,
    pub ordering: String,
    #[serde(default)]
    pub version: String,
    pub counterparty: ChannelCounterparty,
    #[serde(default)]
    pub connection_hops: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelCounterparty {
    pub port_id: String,
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    channel: ChannelEnd,
}

#[derive(Debug, Deserialize)]
struct CommitmentResponse {
    commitment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcknowledgementResponse {
    acknowledgement: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptResponse {
    #[serde(default)]
    received: bool,
}

#[derive(Debug, Deserialize)]
struct UnreceivedPacketsResponse {
    #[serde(default)]
    sequences: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NextSequenceResponse {
    next_sequence_receive: String,
}

#[derive(Debug, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
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

/// Evidence that a packet has not been received on the counterparty,
/// gathered per the channel's ordering mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreceivedProof {
    pub is_ordered: bool,
    /// Ordered channels: the counterparty's next expected sequence
    pub next_sequence_receive: Option<u64>,
    /// Unordered channels: whether a receipt exists for the sequence
    pub received: Option<bool>,
}

pub struct RemoteChainClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteChainClient {
    pub fn new(lcd_url: &str, config: &RemoteRpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(2)
            .build()
            .wrap_err("Failed to build HTTP client for remote chain")?;

        Ok(RemoteChainClient {
            http,
            base_url: lcd_url.trim_end_matches('/').to_string(),
        })
    }

    /// Current block height of the remote chain.
    pub async fn current_height(&self) -> Result<u64> {
        let url = format!(
            "{}/cosmos/base/tendermint/v1beta1/blocks/latest",
            self.base_url
        );
        let response: LatestBlockResponse = self.get_json(&url).await?.ok_or_else(|| {
            eyre!("Remote chain returned 404 for latest block")
        })?;
        response
            .block
            .header
            .height
            .parse()
            .wrap_err("Invalid height in latest block response")
    }

    /// Channel end on the remote chain, or None when it does not exist.
    pub async fn query_channel(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelEnd>> {
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}",
            self.base_url, channel_id, port_id
        );
        Ok(self
            .get_json::<ChannelResponse>(&url)
            .await?
            .map(|r| r.channel))
    }

    /// Whether a packet commitment exists. 404 means no commitment.
    pub async fn query_packet_commitment(
        &self,
        port_id: &str,
        channel_id: &str,
        sequence: u64,
    ) -> Result<bool> {
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}/packet_commitments/{}",
            self.base_url, channel_id, port_id, sequence
        );
        Ok(self
            .get_json::<CommitmentResponse>(&url)
            .await?
            .and_then(|r| r.commitment)
            .is_some())
    }

    /// Acknowledgement payload for a packet, or None when absent.
    pub async fn query_packet_acknowledgement(
        &self,
        port_id: &str,
        channel_id: &str,
        sequence: u64,
    ) -> Result<Option<String>> {
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}/packet_acks/{}",
            self.base_url, channel_id, port_id, sequence
        );
        Ok(self
            .get_json::<AcknowledgementResponse>(&url)
            .await?
            .and_then(|r| r.acknowledgement))
    }

    /// Whether a receipt exists for a packet (unordered channels).
    pub async fn query_packet_receipt(
        &self,
        port_id: &str,
        channel_id: &str,
        sequence: u64,
    ) -> Result<bool> {
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}/packet_receipts/{}",
            self.base_url, channel_id, port_id, sequence
        );
        Ok(self
            .get_json::<ReceiptResponse>(&url)
            .await?
            .map(|r| r.received)
            .unwrap_or(false))
    }

    /// Which of the given sequences the remote chain has not received.
    pub async fn query_unreceived_packets(
        &self,
        port_id: &str,
        channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>> {
        if sequences.is_empty() {
            return Ok(Vec::new());
        }
        let joined = sequences
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}/packet_commitments/{}/unreceived_packets",
            self.base_url, channel_id, port_id, joined
        );
        let response = self
            .get_json::<UnreceivedPacketsResponse>(&url)
            .await?
            .unwrap_or(UnreceivedPacketsResponse {
                sequences: Vec::new(),
            });
        Ok(response
            .sequences
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect())
    }

    /// Next sequence the remote chain expects to receive on a channel.
    pub async fn query_next_sequence_receive(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Option<u64>> {
        let url = format!(
            "{}/ibc/core/channel/v1/channels/{}/ports/{}/next_sequence",
            self.base_url, channel_id, port_id
        );
        Ok(self
            .get_json::<NextSequenceResponse>(&url)
            .await?
            .and_then(|r| r.next_sequence_receive.parse().ok()))
    }

    /// Gather non-receipt evidence for a packet, by channel ordering.
    pub async fn unreceived_packet_proof(
        &self,
        port_id: &str,
        channel_id: &str,
        sequence: u64,
        is_ordered: bool,
    ) -> Result<UnreceivedProof> {
        if is_ordered {
            let next = self
                .query_next_sequence_receive(port_id, channel_id)
                .await?;
            Ok(UnreceivedProof {
                is_ordered: true,
                next_sequence_receive: next,
                received: None,
            })
        } else {
            let received = self
                .query_packet_receipt(port_id, channel_id, sequence)
                .await?;
            Ok(UnreceivedProof {
                is_ordered: false,
                next_sequence_receive: None,
                received: Some(received),
            })
        }
    }

    /// Best-effort packet reconstruction: search recent transactions for the
    /// originating send event; when nothing can be recovered, synthesize a
    /// minimal packet carrying just the routing identity.
    pub async fn reconstruct_packet(
        &self,
        port_id: &str,
        channel_id: &str,
        sequence: u64,
    ) -> Result<PacketInfo> {
        let url = format!(
            "{}/cosmos/tx/v1beta1/txs?events=send_packet.packet_sequence='{}'&events=send_packet.packet_src_channel='{}'",
            self.base_url, sequence, channel_id
        );

        match self.get_json::<TxSearchResponse>(&url).await {
            Ok(Some(response)) => {
                for tx in response.tx_responses {
                    for event in &tx.events {
                        if event.type_str != "send_packet" {
                            continue;
                        }
                        let ibc_event = IbcEvent {
                            event_type: event.type_str.clone(),
                            attributes: event
                                .attributes
                                .iter()
                                .map(|a| EventAttribute {
                                    key: a.key.clone(),
                                    value: a.value.clone(),
                                })
                                .collect(),
                        };
                        let attrs = flatten_attributes(&ibc_event.attributes);
                        if let Some(info) = extract_packet_info("send_packet", &attrs) {
                            if info.sequence == sequence {
                                return Ok(info);
                            }
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, sequence, "Packet reconstruction query failed");
            }
        }

        debug!(sequence, %channel_id, "Synthesizing minimal packet");
        Ok(PacketInfo {
            sequence,
            source_port: port_id.to_string(),
            source_channel: channel_id.to_string(),
            destination_port: port_id.to_string(),
            destination_channel: String::new(),
            data: None,
            timeout_height: None,
            timeout_timestamp: None,
        })
    }

    /// GET a JSON resource. 404 resolves to None; other failures error.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .wrap_err_with(|| format!("Remote chain request failed: {}", url))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .wrap_err("Failed to read remote chain response body")?;

        if !status.is_success() {
            return Err(eyre!(
                "Remote chain returned status {} url={} body={}",
                status,
                url,
                clip_for_log(&body, 300)
            ));
        }

        let parsed = serde_json::from_str(&body).wrap_err_with(|| {
            format!(
                "Failed to parse remote chain response url={} body={}",
                url,
                clip_for_log(&body, 300)
            )
        })?;
        Ok(Some(parsed))
    }
}

fn clip_for_log(input: &str, max_chars: usize) -> String {
    let clipped: String = input.chars().take(max_chars).collect();
    if input.chars().count() > max_chars {
        format!("{}...(truncated)", clipped)
    } else {
        clipped
    }
}
