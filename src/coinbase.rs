//! Best-effort recovery of human readable text from a coinbase script.

use crate::rpc::RawTransaction;

/// Longest message kept, in characters.
pub const MAX_MESSAGE_LEN: usize = 150;
/// Hex characters shown when the script carries no text.
const BINARY_PREVIEW_LEN: usize = 60;
/// Characters of a decode error kept after the `Parse error: ` prefix.
const PARSE_ERROR_LEN: usize = 50;
/// Shortest printable run treated as text rather than stray encoding bytes.
const MIN_RUN_LEN: usize = 2;

/// Extract the embedded message from a block's first transaction.
///
/// Never fails: malformed input yields a descriptive placeholder.
pub fn extract_coinbase_message(coinbase_tx: &RawTransaction) -> String {
    let Some(first_input) = coinbase_tx.vin.first() else {
        return "No coinbase input".to_string();
    };

    match first_input.get("coinbase").and_then(|v| v.as_str()) {
        Some(script_hex) => message_from_script_hex(script_hex),
        None => "Not a coinbase transaction".to_string(),
    }
}

/// Extract text from a hex encoded coinbase script.
pub fn message_from_script_hex(script_hex: &str) -> String {
    let script = match hex::decode(script_hex) {
        Ok(bytes) => bytes,
        Err(e) => return format!("Parse error: {}", truncate(&e.to_string(), PARSE_ERROR_LEN)),
    };

    let message = printable_runs(&script)
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if !message.is_empty() {
        return truncate(&message, MAX_MESSAGE_LEN);
    }

    if script.is_empty() {
        return "Empty coinbase".to_string();
    }

    let ellipsis = if script_hex.len() > BINARY_PREVIEW_LEN { "..." } else { "" };
    format!(
        "Binary coinbase: {}{}",
        &script_hex[..script_hex.len().min(BINARY_PREVIEW_LEN)],
        ellipsis
    )
}

fn printable_runs(script: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for &byte in script {
        if (0x20..=0x7e).contains(&byte) {
            current.push(byte as char);
        } else {
            if current.len() >= MIN_RUN_LEN {
                runs.push(std::mem::take(&mut current));
            }
            current.clear();
        }
    }
    if current.len() >= MIN_RUN_LEN {
        runs.push(current);
    }

    runs
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coinbase_tx(script_hex: &str) -> RawTransaction {
        RawTransaction {
            txid: "00".repeat(32),
            vin: vec![json!({"coinbase": script_hex, "sequence": 4294967295u32})],
            vout: vec![],
            blockhash: None,
            confirmations: None,
            time: None,
        }
    }

    #[test]
    fn test_hello_amid_padding() {
        let script = format!("0301{}00ff{}0002", "00", hex::encode("hello"));
        assert_eq!(message_from_script_hex(&script), "hello");
    }

    #[test]
    fn test_single_printable_bytes_are_dropped() {
        // lone 'A' between binary bytes is encoding noise
        let script = format!("0141ff{}", hex::encode("/pool tag/"));
        assert_eq!(message_from_script_hex(&script), "/pool tag/");
    }

    #[test]
    fn test_runs_are_joined_and_whitespace_collapsed() {
        let script = format!(
            "{}00{}",
            hex::encode("mined by   alice "),
            hex::encode("  for the demo")
        );
        assert_eq!(
            message_from_script_hex(&script),
            "mined by alice for the demo"
        );
    }

    #[test]
    fn test_binary_fallback() {
        let script = "0001020304050607";
        assert_eq!(message_from_script_hex(script), "Binary coinbase: 0001020304050607");

        let long = "01".repeat(40);
        let message = message_from_script_hex(&long);
        assert!(message.starts_with("Binary coinbase: "));
        assert!(message.ends_with("..."));
        assert_eq!(message.len(), "Binary coinbase: ".len() + 60 + 3);
    }

    #[test]
    fn test_placeholders_never_panic() {
        assert_eq!(message_from_script_hex(""), "Empty coinbase");
        assert!(message_from_script_hex("zz").starts_with("Parse error"));

        let mut tx = coinbase_tx("00");
        tx.vin.clear();
        assert_eq!(extract_coinbase_message(&tx), "No coinbase input");

        tx.vin.push(json!({"txid": "ab".repeat(32), "vout": 0}));
        assert_eq!(extract_coinbase_message(&tx), "Not a coinbase transaction");
    }

    #[test]
    fn test_parse_error_keeps_prefix_and_bounds_detail() {
        let script = format!("{}zz", "00".repeat(61_728));
        assert_eq!(
            message_from_script_hex(&script),
            "Parse error: Invalid character 'z' at position 123456"
        );

        let message = message_from_script_hex("abc");
        assert_eq!(message, "Parse error: Odd number of digits");
        assert!(message.len() <= "Parse error: ".len() + PARSE_ERROR_LEN);
    }

    #[test]
    fn test_message_is_bounded() {
        let script = hex::encode("x".repeat(400));
        let tx = coinbase_tx(&script);
        assert_eq!(extract_coinbase_message(&tx).len(), MAX_MESSAGE_LEN);
    }
}
