//! CBOR encode/decode for the control and JSON data planes.
//!
//! The object model is `serde_json::Value`; CBOR is only the transfer
//! encoding. Decoding never panics on malformed input.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ClientError, Result};

/// CBOR-encode any serializable request object.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ClientError::Codec(e.to_string()))?;
    Ok(out)
}

/// Decode a CBOR payload back into the JSON object model.
pub fn decode_cbor(bytes: &[u8]) -> Result<Value> {
    ciborium::de::from_reader(bytes).map_err(|e| ClientError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_round_trip() {
        let value = json!({
            "op": "create",
            "target": {"kind": "writer", "topic": "cannon/cmd"},
            "args": null,
            "proto": 1,
        });
        let bytes = encode_cbor(&value).unwrap();
        assert_eq!(decode_cbor(&bytes).unwrap(), value);
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(decode_cbor(&[0xFF, 0x00, 0x13, 0x37]).is_err());
        assert!(decode_cbor(b"").is_err());
    }

    #[test]
    fn truncated_cbor_is_an_error() {
        let bytes = encode_cbor(&json!({"ok": true, "req_id": 7})).unwrap();
        assert!(decode_cbor(&bytes[..bytes.len() - 1]).is_err());
    }
}
