//! Pure transition functions for transfer acknowledgement and timeout.
//!
//! These never touch the store: they take a transfer record and return the
//! updated copy, so the processor can decide when and whether to persist.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::db::models::TransferRecord;
use crate::types::TransferStatus;

/// Decide whether an acknowledgement event reports success.
///
/// An explicit `packet_ack_error`/`error` attribute is a failure. A JSON ack
/// carrying `error`, a non-zero `code`, or `result == "error"` is a failure.
/// An unparseable ack mentioning "error" is a failure. Everything else is
/// success (the common `{"result":"AQ=="}` shape).
pub fn is_successful_acknowledgement(attrs: &HashMap<String, String>) -> bool {
    if attrs.contains_key("packet_ack_error") || attrs.contains_key("error") {
        return false;
    }

    let ack = attrs
        .get("packet_ack")
        .or_else(|| attrs.get("acknowledgement"));

    let Some(ack) = ack else {
        // No ack payload at all: nothing indicates failure.
        return true;
    };

    match serde_json::from_str::<serde_json::Value>(ack) {
        Ok(parsed) => {
            if parsed.get("error").is_some() {
                return false;
            }
            if let Some(code) = parsed.get("code") {
                if code.as_i64() != Some(0) {
                    return false;
                }
            }
            if parsed.get("result").and_then(|r| r.as_str()) == Some("error") {
                return false;
            }
            true
        }
        Err(_) => !(ack.contains("error") || ack.contains("Error")),
    }
}

/// Extract the human-readable error carried by a failed acknowledgement.
pub fn acknowledgement_error(attrs: &HashMap<String, String>) -> Option<String> {
    if let Some(err) = attrs.get("packet_ack_error").or_else(|| attrs.get("error")) {
        return Some(err.clone());
    }

    let ack = attrs
        .get("packet_ack")
        .or_else(|| attrs.get("acknowledgement"))?;

    match serde_json::from_str::<serde_json::Value>(ack) {
        Ok(parsed) => parsed
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .or_else(|| Some(ack.clone())),
        Err(_) => Some(ack.clone()),
    }
}

/// Apply an acknowledgement to a transfer, producing the updated record.
pub fn apply_acknowledgement(
    transfer: &TransferRecord,
    tx_hash: &str,
    height: i64,
    timestamp: DateTime<Utc>,
    ok: bool,
    error: Option<String>,
) -> TransferRecord {
    let mut updated = transfer.clone();
    updated.status = if ok {
        TransferStatus::Completed
    } else {
        TransferStatus::Failed
    };
    updated.success = ok;
    updated.completion_tx_hash = Some(tx_hash.to_string());
    updated.completion_height = Some(height);
    updated.completion_timestamp = Some(timestamp);
    updated.complete_time = Some(timestamp);
    updated.error = if ok { None } else { error };
    updated.updated_at = timestamp;
    updated
}

/// Apply a timeout to a transfer, producing the updated record.
pub fn apply_timeout(
    transfer: &TransferRecord,
    tx_hash: &str,
    height: i64,
    timestamp: DateTime<Utc>,
) -> TransferRecord {
    let mut updated = transfer.clone();
    updated.status = TransferStatus::Timeout;
    updated.success = false;
    updated.timeout_tx_hash = Some(tx_hash.to_string());
    updated.timeout_height = Some(height);
    updated.timeout_timestamp = Some(timestamp);
    updated.complete_time = Some(timestamp);
    updated.error = Some("Packet timed out".to_string());
    updated.updated_at = timestamp;
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Network;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_transfer() -> TransferRecord {
        let now = Utc::now();
        TransferRecord {
            packet_id: "abc123".to_string(),
            network: Network::Mainnet,
            status: TransferStatus::Pending,
            sequence: 7,
            sender: "bbn1a".to_string(),
            receiver: "cosmos1b".to_string(),
            amount: "1000000".to_string(),
            denom: "ubbn".to_string(),
            memo: None,
            success: false,
            error: None,
            token_symbol: Some("BABY".to_string()),
            token_display_amount: Some("1".to_string()),
            source_chain_id: "bbn-1".to_string(),
            source_chain_name: "Babylon".to_string(),
            destination_chain_id: "osmosis-1".to_string(),
            destination_chain_name: "Osmosis".to_string(),
            source_channel_id: "channel-0".to_string(),
            destination_channel_id: "channel-12".to_string(),
            tx_hash: "TX1".to_string(),
            send_time: Some(now),
            complete_time: None,
            completion_tx_hash: None,
            completion_height: None,
            completion_timestamp: None,
            timeout_tx_hash: None,
            timeout_height: None,
            timeout_timestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_success_ack_shapes() {
        assert!(is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            r#"{"result":"AQ=="}"#
        )])));
        assert!(is_successful_acknowledgement(&attrs(&[])));
        assert!(is_successful_acknowledgement(&attrs(&[(
            "acknowledgement",
            r#"{"result":"MQ=="}"#
        )])));
    }

    #[test]
    fn test_explicit_error_attribute_fails() {
        assert!(!is_successful_acknowledgement(&attrs(&[(
            "packet_ack_error",
            "insufficient funds"
        )])));
        assert!(!is_successful_acknowledgement(&attrs(&[("error", "boom")])));
    }

    #[test]
    fn test_json_error_ack_fails() {
        assert!(!is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            r#"{"error":"denied"}"#
        )])));
        assert!(!is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            r#"{"code":5}"#
        )])));
        assert!(!is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            r#"{"result":"error"}"#
        )])));
    }

    #[test]
    fn test_unparseable_ack_with_error_text_fails() {
        assert!(!is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            "ABCI code 5: Error executing"
        )])));
        assert!(is_successful_acknowledgement(&attrs(&[(
            "packet_ack",
            "AQ=="
        )])));
    }

    #[test]
    fn test_acknowledgement_error_extraction() {
        assert_eq!(
            acknowledgement_error(&attrs(&[("packet_ack_error", "insufficient funds")])),
            Some("insufficient funds".to_string())
        );
        assert_eq!(
            acknowledgement_error(&attrs(&[("packet_ack", r#"{"error":"denied"}"#)])),
            Some("denied".to_string())
        );
    }

    #[test]
    fn test_apply_acknowledgement_success() {
        let transfer = sample_transfer();
        let ts = Utc::now();
        let updated = apply_acknowledgement(&transfer, "TX2", 110, ts, true, None);
        assert_eq!(updated.status, TransferStatus::Completed);
        assert!(updated.success);
        assert_eq!(updated.completion_tx_hash.as_deref(), Some("TX2"));
        assert_eq!(updated.completion_height, Some(110));
        assert_eq!(updated.completion_timestamp, Some(ts));
        assert!(updated.error.is_none());
        // The input is untouched.
        assert_eq!(transfer.status, TransferStatus::Pending);
    }

    #[test]
    fn test_apply_acknowledgement_failure() {
        let transfer = sample_transfer();
        let updated = apply_acknowledgement(
            &transfer,
            "TX2",
            110,
            Utc::now(),
            false,
            Some("insufficient funds".to_string()),
        );
        assert_eq!(updated.status, TransferStatus::Failed);
        assert!(!updated.success);
        assert_eq!(updated.error.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn test_apply_timeout() {
        let transfer = sample_transfer();
        let updated = apply_timeout(&transfer, "TX3", 120, Utc::now());
        assert_eq!(updated.status, TransferStatus::Timeout);
        assert!(!updated.success);
        assert_eq!(updated.error.as_deref(), Some("Packet timed out"));
        assert_eq!(updated.timeout_tx_hash.as_deref(), Some("TX3"));
        assert_eq!(updated.timeout_height, Some(120));
    }

    #[test]
    fn test_reapplying_terminal_event_is_stable() {
        let transfer = sample_transfer();
        let ts = Utc::now();
        let once = apply_acknowledgement(&transfer, "TX2", 110, ts, true, None);
        let twice = apply_acknowledgement(&once, "TX2", 110, ts, true, None);
        assert_eq!(once.status, twice.status);
        assert_eq!(once.success, twice.success);
        assert_eq!(once.completion_tx_hash, twice.completion_tx_hash);
        assert_eq!(once.completion_timestamp, twice.completion_timestamp);
    }
}
