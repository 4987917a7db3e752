// src/utils/serialization.rs
//! Serialization utilities for the proxy.
//!
//! Provides the small encode/decode helpers used at the HTTP boundary:
//! - base64 wrapping of PEM material returned to clients
//! - JSON-or-text detection for raw chaincode results

use serde::de::IgnoredAny;

/// Base64-encodes PEM text for transport inside JSON.
pub fn encode_pem(pem: &str) -> String {
    base64::encode(pem.as_bytes())
}

/// Decodes a base64 string that wraps PEM text.
///
/// # Errors
/// Returns a message when the input is not base64 or not UTF-8.
pub fn decode_base64_pem(data: &str) -> Result<String, String> {
    let bytes = base64::decode(data.trim()).map_err(|e| format!("Base64 decoding failed: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("PEM is not valid UTF-8: {}", e))
}

/// Returns `true` when `bytes` hold a single well-formed JSON document.
///
/// Chaincode results are opaque; the proxy only decides whether to label
/// them `application/json` or `text/plain`.
pub fn is_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(bytes).is_ok()
}
