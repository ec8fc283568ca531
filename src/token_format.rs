//! Display formatting and payload parsing for transferred tokens.
//!
//! Amount scaling is integer-only: base-unit strings are parsed into u128 and
//! split against a power of ten, never through floating point.

use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized fungible-token transfer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferData {
    pub sender: String,
    pub receiver: String,
    pub denom: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Derive a display symbol from a raw denom.
pub fn extract_token_symbol(denom: &str) -> String {
    if denom == "ubbn" {
        return "BABY".to_string();
    }

    if denom.starts_with("ibc/") {
        return "IBC".to_string();
    }

    if denom.contains('/') {
        let last = denom.rsplit('/').next().unwrap_or(denom);
        let stripped = last
            .strip_prefix('u')
            .or_else(|| last.strip_prefix('a'))
            .unwrap_or(last);
        return stripped.to_uppercase();
    }

    denom.to_uppercase()
}

/// Decimal places used when scaling a symbol for display.
pub fn decimals_for_symbol(symbol: &str) -> u32 {
    match symbol.to_uppercase().as_str() {
        "BTC" | "WBTC" => 8,
        "ETH" | "WETH" => 18,
        _ => 6,
    }
}

/// Scale a base-unit amount for display, trimming trailing fractional zeros.
///
/// `"1000000"` at 6 decimals renders `"1"`; `"1500000"` renders `"1.5"`.
pub fn format_token_amount(amount: &str, symbol: &str) -> Result<String> {
    let decimals = decimals_for_symbol(symbol);
    scale_amount(amount, decimals)
}

/// Integer decimal scaling of a non-negative base-unit amount.
pub fn scale_amount(amount: &str, decimals: u32) -> Result<String> {
    let units: u128 = amount
        .trim()
        .parse()
        .wrap_err_with(|| format!("Invalid token amount: {}", amount))?;

    if decimals == 0 {
        return Ok(units.to_string());
    }

    let divisor = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| eyre!("Decimal scale {} overflows", decimals))?;

    let whole = units / divisor;
    let frac = units % divisor;

    if frac == 0 {
        return Ok(whole.to_string());
    }

    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    Ok(format!("{}.{}", whole, trimmed))
}

/// Parse a transfer payload from a packet-data value.
///
/// Accepts either a JSON string (the usual `packet_data` attribute) or an
/// already-decoded object.
pub fn parse_transfer_data(value: &Value) -> Result<TransferData> {
    let obj = match value {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .wrap_err("Transfer data string is not valid JSON")?,
        other => other.clone(),
    };

    serde_json::from_value(obj).wrap_err("Transfer data missing required fields")
}

/// Parse a transfer payload straight from a raw attribute string.
pub fn parse_transfer_data_str(raw: &str) -> Result<TransferData> {
    parse_transfer_data(&Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_symbol_ubbn() {
        assert_eq!(extract_token_symbol("ubbn"), "BABY");
    }

    #[test]
    fn test_extract_symbol_ibc_hash() {
        assert_eq!(
            extract_token_symbol("ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"),
            "IBC"
        );
    }

    #[test]
    fn test_extract_symbol_trace_path() {
        assert_eq!(extract_token_symbol("transfer/channel-0/uatom"), "ATOM");
        assert_eq!(extract_token_symbol("transfer/channel-1/aevmos"), "EVMOS");
        assert_eq!(extract_token_symbol("transfer/channel-2/wbtc"), "WBTC");
    }

    #[test]
    fn test_extract_symbol_plain() {
        assert_eq!(extract_token_symbol("uluna"), "ULUNA");
        assert_eq!(extract_token_symbol("stake"), "STAKE");
    }

    #[test]
    fn test_format_whole_amount() {
        assert_eq!(format_token_amount("1000000", "BABY").unwrap(), "1");
        assert_eq!(format_token_amount("123000000", "ATOM").unwrap(), "123");
    }

    #[test]
    fn test_format_fractional_amount() {
        assert_eq!(format_token_amount("1500000", "ATOM").unwrap(), "1.5");
        assert_eq!(format_token_amount("1", "ATOM").unwrap(), "0.000001");
        assert_eq!(format_token_amount("150000000", "WBTC").unwrap(), "1.5");
    }

    #[test]
    fn test_format_zero() {
        assert_eq!(format_token_amount("0", "ATOM").unwrap(), "0");
    }

    #[test]
    fn test_format_rejects_garbage() {
        assert!(format_token_amount("12.5", "ATOM").is_err());
        assert!(format_token_amount("abc", "ATOM").is_err());
        assert!(format_token_amount("-5", "ATOM").is_err());
    }

    #[test]
    fn test_scale_amount_round_trip() {
        // Scaling then re-multiplying recovers the base units exactly.
        for (amount, decimals) in [
            ("1000000", 6u32),
            ("1500000", 6),
            ("1", 6),
            ("999999999999", 8),
            ("123456789000000000000", 18),
            ("0", 6),
        ] {
            let formatted = scale_amount(amount, decimals).unwrap();
            let (whole, frac) = match formatted.split_once('.') {
                Some((w, f)) => (w.to_string(), f.to_string()),
                None => (formatted.clone(), String::new()),
            };
            let mut padded = frac.clone();
            while (padded.len() as u32) < decimals {
                padded.push('0');
            }
            let recombined: u128 = format!("{}{}", whole, padded).parse().unwrap();
            assert_eq!(recombined, amount.parse::<u128>().unwrap(), "for {}", formatted);
        }
    }

    #[test]
    fn test_parse_transfer_data_from_string() {
        let raw = r#"{"sender":"bbn1a","receiver":"cosmos1b","denom":"ubbn","amount":"1000000"}"#;
        let data = parse_transfer_data_str(raw).unwrap();
        assert_eq!(data.sender, "bbn1a");
        assert_eq!(data.receiver, "cosmos1b");
        assert_eq!(data.denom, "ubbn");
        assert_eq!(data.amount, "1000000");
        assert!(data.memo.is_none());
    }

    #[test]
    fn test_parse_transfer_data_from_object() {
        let value = json!({
            "sender": "bbn1a",
            "receiver": "osmo1c",
            "denom": "uosmo",
            "amount": "42",
            "memo": "hello"
        });
        let data = parse_transfer_data(&value).unwrap();
        assert_eq!(data.memo.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_transfer_data_round_trip() {
        let data = TransferData {
            sender: "bbn1sender".to_string(),
            receiver: "cosmos1receiver".to_string(),
            denom: "uatom".to_string(),
            amount: "123456".to_string(),
            memo: None,
        };
        let encoded = serde_json::to_string(&data).unwrap();
        let decoded = parse_transfer_data_str(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_parse_transfer_data_rejects_incomplete() {
        assert!(parse_transfer_data_str(r#"{"sender":"a"}"#).is_err());
        assert!(parse_transfer_data_str("not json").is_err());
    }
}
