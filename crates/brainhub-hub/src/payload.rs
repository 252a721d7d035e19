//! Base64/JSON payload normalization.
//!
//! Task sets and task results arrive as single command tokens that may be
//! raw JSON, base64-encoded JSON, or explicitly prefixed `base64:` /
//! `b64:`. Decoding order matters: JSON is tried first so a valid JSON
//! document whose characters happen to be base64-legal (e.g. `1234`) is
//! never decoded by accident, and the auto-detect path additionally
//! requires the decoded bytes to be printable ASCII before it trusts them.
//! URL-safe alphabets are accepted and padding is optional on every path.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use serde_json::Value;

/// Normalize one payload token to a JSON value.
///
/// Falls back to a plain string when nothing decodes.
pub(crate) fn decode_payload(input: &str) -> Value {
    let trimmed = input.trim();

    for prefix in ["base64:", "b64:"] {
        if let Some(rest) = strip_prefix_ignore_case(trimmed, prefix) {
            // Forced path: the caller asserted base64, so a decode failure
            // degrades to the raw token rather than re-probing.
            return match decode_base64_bytes(rest).and_then(|bytes| String::from_utf8(bytes).ok()) {
                Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                None => Value::String(trimmed.to_string()),
            };
        }
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }

    if looks_like_base64(trimmed) {
        if let Some(text) = decode_base64_bytes(trimmed)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|text| is_printable_ascii(text))
        {
            if let Ok(value) = serde_json::from_str(&text) {
                return value;
            }
        }
    }

    Value::String(trimmed.to_string())
}

/// Decode base64 accepting both alphabets, ignoring whitespace, with
/// optional padding.
pub(crate) fn decode_base64_bytes(input: &str) -> Option<Vec<u8>> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let stripped = normalized.trim_end_matches('=');
    if stripped.is_empty() {
        return None;
    }
    STANDARD_NO_PAD.decode(stripped).ok()
}

fn looks_like_base64(input: &str) -> bool {
    input.len() >= 4
        && input
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'-' | b'_'))
}

fn is_printable_ascii(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_graphic() || c.is_ascii_whitespace())
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    input
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &input[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serde_json::json;

    #[test]
    fn raw_json_wins_over_base64_probe() {
        // "1234" is base64-legal but parses as JSON first.
        assert_eq!(decode_payload("1234"), json!(1234));
        assert_eq!(decode_payload("[1,2,3]"), json!([1, 2, 3]));
        assert_eq!(decode_payload(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_payload(r#""abcd""#), json!("abcd"));
    }

    #[test]
    fn auto_detected_base64_json() {
        // base64("[1,2,3]") without padding.
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode("[1,2,3]");
        assert_eq!(decode_payload(&encoded), json!([1, 2, 3]));
    }

    #[test]
    fn forced_prefix_decodes() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"x":true}"#);
        assert_eq!(decode_payload(&format!("base64:{encoded}")), json!({"x": true}));
        assert_eq!(decode_payload(&format!("B64:{encoded}")), json!({"x": true}));
    }

    #[test]
    fn url_safe_and_unpadded_accepted() {
        // base64url("{\"k\":\"v+v/v\"}") uses '-' and '_'.
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"k":"v+v/v"}"#);
        assert!(encoded.contains('-') || encoded.contains('_') || !encoded.contains('='));
        assert_eq!(decode_payload(&format!("b64:{encoded}")), json!({"k": "v+v/v"}));
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"k":1}"#);
        assert_eq!(decode_payload(&format!("b64:{padded}")), json!({"k": 1}));
    }

    #[test]
    fn forced_prefix_with_plain_text_keeps_decoded_string() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("hello there");
        assert_eq!(
            decode_payload(&format!("base64:{encoded}")),
            json!("hello there")
        );
    }

    #[test]
    fn garbage_falls_back_to_string() {
        assert_eq!(decode_payload("not json at all!"), json!("not json at all!"));
        // Base64-legal but decodes to non-JSON binary noise.
        assert_eq!(decode_payload("zzzz"), json!("zzzz"));
    }

    #[test]
    fn binary_decode_rejected_by_printable_probe() {
        // "//// " decodes to 0xFF bytes; the probe must refuse them.
        assert_eq!(decode_payload("////"), json!("////"));
    }

    #[test]
    fn decode_base64_bytes_handles_padding_variants() {
        assert_eq!(decode_base64_bytes("aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64_bytes("aGk").unwrap(), b"hi");
        assert!(decode_base64_bytes("").is_none());
        assert!(decode_base64_bytes("!!").is_none());
    }
}
