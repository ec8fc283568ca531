//! Packet identity: attribute flattening, the packet fingerprint, and the
//! per-transaction context that lets token-packet events inherit routing
//! metadata from an earlier event in the same transaction.

use md5::{Digest, Md5};
use std::collections::{HashMap, VecDeque};

use crate::types::{EventAttribute, TimeoutHeight};

/// Events that carry full packet routing attributes.
pub const ROUTING_EVENTS: [&str; 4] = [
    "send_packet",
    "recv_packet",
    "acknowledge_packet",
    "timeout_packet",
];

/// Transfer-module events that may lack routing attributes.
pub const TRANSFER_MODULE_EVENTS: [&str; 2] = ["fungible_token_packet", "transfer_packet"];

/// Routing identity of one packet as recovered from event attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    pub sequence: u64,
    pub source_port: String,
    pub source_channel: String,
    pub destination_port: String,
    pub destination_channel: String,
    pub data: Option<String>,
    pub timeout_height: Option<TimeoutHeight>,
    pub timeout_timestamp: Option<String>,
}

impl PacketInfo {
    /// Stable fingerprint for this packet, keyed on the source side.
    pub fn packet_id(&self) -> String {
        create_packet_id(&self.source_port, &self.source_channel, self.sequence)
    }
}

/// Flatten event attributes to a map, keeping the last occurrence per key.
pub fn flatten_attributes(attributes: &[EventAttribute]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(attributes.len());
    for attr in attributes {
        map.insert(attr.key.clone(), attr.value.clone());
    }
    map
}

/// Synthesized packet identity: the first 24 hex characters of
/// MD5(`"<port>/<channel>/<sequence>"`).
pub fn create_packet_id(port: &str, channel: &str, sequence: u64) -> String {
    let input = format!("{}/{}/{}", port, channel, sequence);
    let digest = Md5::digest(input.as_bytes());
    hex::encode(digest)[..24].to_string()
}

/// Deterministic fallback fingerprint: the 32-bit rolling hash
/// `(h << 5) - h + c` of the same input, hex, right-padded to 24 chars.
/// Weaker than MD5; kept for environments without a digest implementation.
pub fn fallback_packet_id(port: &str, channel: &str, sequence: u64) -> String {
    let input = format!("{}/{}/{}", port, channel, sequence);
    let mut h: i32 = 0;
    for c in input.chars() {
        h = (h << 5).wrapping_sub(h).wrapping_add(c as i32);
    }
    format!("{:x}", h as u32 as u64)
        .chars()
        .chain(std::iter::repeat('0'))
        .take(24)
        .collect()
}

/// What the context remembers about the last packet-bearing event in a tx.
#[derive(Debug, Clone)]
pub struct TxPacketContext {
    pub last_packet_info: PacketInfo,
    pub last_event_type: String,
}

const TX_CONTEXT_CAP: usize = 1000;
const TX_CONTEXT_DROP: usize = 500;

/// Bounded `tx_hash → TxPacketContext` map with insertion-order eviction.
///
/// When the cap is hit, the oldest half is dropped in one sweep so eviction
/// cost stays amortized instead of per-insert.
pub struct TxContextMap {
    entries: HashMap<String, TxPacketContext>,
    order: VecDeque<String>,
    cap: usize,
    drop_count: usize,
}

impl TxContextMap {
    pub fn new() -> Self {
        Self::with_capacity(TX_CONTEXT_CAP, TX_CONTEXT_DROP)
    }

    pub fn with_capacity(cap: usize, drop_count: usize) -> Self {
        TxContextMap {
            entries: HashMap::new(),
            order: VecDeque::new(),
            cap,
            drop_count,
        }
    }

    pub fn get(&self, tx_hash: &str) -> Option<&TxPacketContext> {
        self.entries.get(tx_hash)
    }

    /// Record the packet info seen for a transaction. Updating an existing
    /// entry keeps its original insertion position.
    pub fn record(&mut self, tx_hash: &str, info: PacketInfo, event_type: &str) {
        if !self.entries.contains_key(tx_hash) {
            if self.entries.len() >= self.cap {
                for _ in 0..self.drop_count.min(self.order.len()) {
                    if let Some(oldest) = self.order.pop_front() {
                        self.entries.remove(&oldest);
                    }
                }
            }
            self.order.push_back(tx_hash.to_string());
        }
        self.entries.insert(
            tx_hash.to_string(),
            TxPacketContext {
                last_packet_info: info,
                last_event_type: event_type.to_string(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TxContextMap {
    fn default() -> Self {
        Self::new()
    }
}

fn first_of<'a>(attrs: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| attrs.get(*k).map(String::as_str))
}

/// Recover packet routing info from flattened attributes.
///
/// Transfer-module events missing a sequence may fall back to `msg_index`
/// with both ports defaulted to `transfer`. Returns None when any required
/// field stays missing.
pub fn extract_packet_info(
    event_type: &str,
    attrs: &HashMap<String, String>,
) -> Option<PacketInfo> {
    let is_transfer_module = TRANSFER_MODULE_EVENTS.contains(&event_type);

    let mut source_port = first_of(attrs, &["packet_src_port", "source_port"]).map(str::to_string);
    let source_channel =
        first_of(attrs, &["packet_src_channel", "source_channel"]).map(str::to_string);
    let mut destination_port =
        first_of(attrs, &["packet_dst_port", "destination_port"]).map(str::to_string);
    let destination_channel =
        first_of(attrs, &["packet_dst_channel", "destination_channel"]).map(str::to_string);

    let mut sequence = first_of(attrs, &["packet_sequence", "sequence"])
        .and_then(|s| s.parse::<u64>().ok());

    if sequence.is_none() && is_transfer_module {
        sequence = attrs.get("msg_index").and_then(|s| s.parse::<u64>().ok());
        if sequence.is_some() {
            source_port.get_or_insert_with(|| "transfer".to_string());
            destination_port.get_or_insert_with(|| "transfer".to_string());
        }
    }

    Some(PacketInfo {
        sequence: sequence?,
        source_port: source_port?,
        source_channel: source_channel?,
        destination_port: destination_port?,
        destination_channel: destination_channel?,
        data: first_of(attrs, &["packet_data", "data"]).map(str::to_string),
        timeout_height: attrs
            .get("packet_timeout_height")
            .and_then(|s| TimeoutHeight::parse(s)),
        timeout_timestamp: attrs.get("packet_timeout_timestamp").cloned(),
    })
}

/// Dispatch one event against the per-transaction context.
///
/// Routing events extract and record; token-packet events extract or inherit
/// the identity recorded earlier in the same transaction; everything else is
/// not a packet event.
pub fn handle_packet_event(
    event_type: &str,
    attrs: &HashMap<String, String>,
    tx_hash: &str,
    context: &mut TxContextMap,
) -> Option<PacketInfo> {
    if ROUTING_EVENTS.contains(&event_type) {
        let info = extract_packet_info(event_type, attrs)?;
        context.record(tx_hash, info.clone(), event_type);
        return Some(info);
    }

    if TRANSFER_MODULE_EVENTS.contains(&event_type) {
        if let Some(info) = extract_packet_info(event_type, attrs) {
            return Some(info);
        }
        return context.get(tx_hash).map(|c| c.last_packet_info.clone());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IbcEvent;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_attrs() -> HashMap<String, String> {
        attrs(&[
            ("packet_src_port", "transfer"),
            ("packet_src_channel", "channel-0"),
            ("packet_dst_port", "transfer"),
            ("packet_dst_channel", "channel-12"),
            ("packet_sequence", "7"),
        ])
    }

    #[test]
    fn test_flatten_keeps_last_occurrence() {
        let event = IbcEvent::new(
            "send_packet",
            vec![("key", "first"), ("key", "second"), ("other", "x")],
        );
        let flat = flatten_attributes(&event.attributes);
        assert_eq!(flat.get("key").map(String::as_str), Some("second"));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_packet_id_deterministic() {
        let a = create_packet_id("transfer", "channel-0", 7);
        let b = create_packet_id("transfer", "channel-0", 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_packet_id_distinct_inputs() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for channel in 0..100u64 {
            for seq in 0..100u64 {
                let id = create_packet_id("transfer", &format!("channel-{}", channel), seq);
                assert!(seen.insert(id), "collision at channel-{} seq {}", channel, seq);
            }
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_fallback_packet_id_shape() {
        let id = fallback_packet_id("transfer", "channel-0", 7);
        assert_eq!(id.len(), 24);
        assert_eq!(id, fallback_packet_id("transfer", "channel-0", 7));
        assert_ne!(id, fallback_packet_id("transfer", "channel-0", 8));
        assert!(id.ends_with('0'));
    }

    #[test]
    fn test_extract_full_routing_attrs() {
        let info = extract_packet_info("send_packet", &full_attrs()).unwrap();
        assert_eq!(info.sequence, 7);
        assert_eq!(info.source_channel, "channel-0");
        assert_eq!(info.destination_channel, "channel-12");
    }

    #[test]
    fn test_extract_alternate_keys() {
        let info = extract_packet_info(
            "send_packet",
            &attrs(&[
                ("source_port", "transfer"),
                ("source_channel", "channel-1"),
                ("destination_port", "transfer"),
                ("destination_channel", "channel-2"),
                ("sequence", "9"),
            ]),
        )
        .unwrap();
        assert_eq!(info.sequence, 9);
        assert_eq!(info.source_channel, "channel-1");
    }

    #[test]
    fn test_extract_missing_sequence_fails() {
        let mut a = full_attrs();
        a.remove("packet_sequence");
        assert!(extract_packet_info("send_packet", &a).is_none());
    }

    #[test]
    fn test_transfer_module_msg_index_fallback() {
        let info = extract_packet_info(
            "fungible_token_packet",
            &attrs(&[
                ("packet_src_channel", "channel-0"),
                ("packet_dst_channel", "channel-12"),
                ("msg_index", "3"),
            ]),
        )
        .unwrap();
        assert_eq!(info.sequence, 3);
        assert_eq!(info.source_port, "transfer");
        assert_eq!(info.destination_port, "transfer");
    }

    #[test]
    fn test_msg_index_fallback_only_for_transfer_module() {
        let mut a = full_attrs();
        a.remove("packet_sequence");
        a.insert("msg_index".to_string(), "3".to_string());
        assert!(extract_packet_info("send_packet", &a).is_none());
    }

    #[test]
    fn test_handle_routing_event_records_context() {
        let mut ctx = TxContextMap::new();
        let info = handle_packet_event("send_packet", &full_attrs(), "TXA", &mut ctx).unwrap();
        assert_eq!(info.sequence, 7);
        assert_eq!(ctx.get("TXA").unwrap().last_event_type, "send_packet");
    }

    #[test]
    fn test_fungible_inherits_from_context() {
        let mut ctx = TxContextMap::new();
        handle_packet_event("send_packet", &full_attrs(), "TXA", &mut ctx).unwrap();

        let sparse = attrs(&[("denom", "ubbn"), ("amount", "500")]);
        let inherited =
            handle_packet_event("fungible_token_packet", &sparse, "TXA", &mut ctx).unwrap();
        assert_eq!(inherited.sequence, 7);
        assert_eq!(inherited.source_channel, "channel-0");
    }

    #[test]
    fn test_fungible_without_context_is_none() {
        let mut ctx = TxContextMap::new();
        let sparse = attrs(&[("denom", "ubbn")]);
        assert!(handle_packet_event("fungible_token_packet", &sparse, "TXZ", &mut ctx).is_none());
    }

    #[test]
    fn test_unknown_event_type_is_none() {
        let mut ctx = TxContextMap::new();
        assert!(handle_packet_event("coin_spent", &full_attrs(), "TXA", &mut ctx).is_none());
    }

    #[test]
    fn test_context_evicts_oldest_half() {
        let mut ctx = TxContextMap::with_capacity(10, 5);
        let info = extract_packet_info("send_packet", &full_attrs()).unwrap();
        for i in 0..10 {
            ctx.record(&format!("TX{}", i), info.clone(), "send_packet");
        }
        assert_eq!(ctx.len(), 10);

        ctx.record("TX10", info.clone(), "send_packet");
        assert_eq!(ctx.len(), 6);
        assert!(ctx.get("TX0").is_none());
        assert!(ctx.get("TX4").is_none());
        assert!(ctx.get("TX5").is_some());
        assert!(ctx.get("TX10").is_some());
    }

    #[test]
    fn test_context_update_does_not_duplicate() {
        let mut ctx = TxContextMap::with_capacity(10, 5);
        let info = extract_packet_info("send_packet", &full_attrs()).unwrap();
        ctx.record("TXA", info.clone(), "send_packet");
        ctx.record("TXA", info, "recv_packet");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get("TXA").unwrap().last_event_type, "recv_packet");
    }
}
