//! Byte and text encoding helpers shared across the storage layer.
//!
//! Everything the engine persists is a TEXT column: ciphertexts and IVs go
//! through standard base64, structured values through compact JSON.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

use crate::error::{Error, Result};

pub fn decode_utf8(data: Vec<u8>) -> Result<String> {
    String::from_utf8(data).map_err(|e| Error::storage(format!("invalid utf-8 payload: {e}")))
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::storage(format!("invalid base64 payload: {e}")))
}

/// Compact JSON, no whitespace. The separators matter: encrypted payloads
/// must decrypt to byte-identical JSON across versions.
pub fn encode_json(value: &serde_json::Value) -> String {
    value.to_string()
}

pub fn decode_json(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| Error::storage(format!("invalid json payload: {e}")))
}

pub fn encode_json_base64(value: &serde_json::Value) -> String {
    encode_base64(encode_json(value).as_bytes())
}

pub fn decode_json_base64(data: &str) -> Result<serde_json::Value> {
    decode_json(&decode_utf8(decode_base64(data)?)?)
}

/// Cryptographically secure random bytes from the OS-seeded generator.
///
/// Used for IVs, salts, DBIDs, key-check bytes, and padding filler.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    rand::rng().fill(&mut bytes[..]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let data = random_bytes(257);
        assert_eq!(decode_base64(&encode_base64(&data)).unwrap(), data);
    }

    #[test]
    fn test_base64_invalid() {
        assert!(decode_base64("not base64 !!").is_err());
    }

    #[test]
    fn test_json_base64_roundtrip() {
        let value = serde_json::json!({"login": "login", "password": "password"});
        assert_eq!(decode_json_base64(&encode_json_base64(&value)).unwrap(), value);
    }

    #[test]
    fn test_json_is_compact() {
        let value = serde_json::json!({"a": 1, "b": [2, 3]});
        assert_eq!(encode_json(&value), r#"{"a":1,"b":[2,3]}"#);
    }

    #[test]
    fn test_random_bytes_distinct() {
        // Extremely unlikely to be equal
        assert_ne!(random_bytes(32), random_bytes(32));
    }
}
