//! Payload blob codec: gzip-compressed JSON, round-tripped exactly.
//!
//! The payload is written at most logically-once per join key, so the same
//! content must always produce the same stored bytes modulo the mutable
//! extras merge applied at read time.

use crate::castflow::model::RedirectPayload;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::io::{Read, Write};
use thiserror::Error;

/// Top-level payload fields that extras may never shadow.
const RESERVED_FIELDS: [&str; 4] = ["type", "timestamp", "download", "impressions"];

/// Codec failures.
///
/// `Corrupt` indicates stored-data corruption needing operator attention and
/// is never silently swallowed downstream.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload encode failed: {0}")]
    Encode(String),
    #[error("stored payload corrupted: {0}")]
    Corrupt(String),
}

/// Serializes and gzip-compresses a payload for storage.
pub fn compress_payload(payload: &RedirectPayload) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(payload).map_err(|e| CodecError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decompresses and parses a stored payload blob.
pub fn decompress_payload(bytes: &[u8]) -> Result<RedirectPayload, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CodecError::Corrupt(format!("gzip: {}", e)))?;
    serde_json::from_slice(&json).map_err(|e| CodecError::Corrupt(format!("json: {}", e)))
}

/// Parses a stored extras attribute (JSON object as string).
pub fn parse_extras(raw: &str) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CodecError::Corrupt(format!(
            "extras is not a JSON object: {}",
            other
        ))),
        Err(e) => Err(CodecError::Corrupt(format!("extras json: {}", e))),
    }
}

/// Serializes an extras map for the store's string attribute.
pub fn extras_to_string(extras: &Map<String, Value>) -> Result<String, CodecError> {
    serde_json::to_string(extras).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Merges extras into the payload's passthrough bag, last-write-wins.
/// Structurally required fields stay typed and cannot be shadowed.
pub fn merge_extras(payload: &mut RedirectPayload, extras: &Map<String, Value>) {
    for (key, value) in extras {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        payload.passthrough.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> RedirectPayload {
        serde_json::from_value(json!({
            "type": "antebytes",
            "timestamp": 1700000000123i64,
            "impressions": [
                {"segment": 0, "adId": "ad-1"},
                {"segment": 2, "adId": "ad-2"}
            ],
            "listenerEpisode": "le1",
            "feederPodcast": 77
        }))
        .unwrap()
    }

    #[test]
    fn test_payload_round_trips_exactly() {
        let payload = sample_payload();
        let bytes = compress_payload(&payload).unwrap();
        let restored = decompress_payload(&bytes).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_corrupt_blob_is_an_error() {
        assert!(matches!(
            decompress_payload(b"definitely not gzip"),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn test_extras_merge_last_write_wins() {
        let mut payload = sample_payload();
        let extras = parse_extras(r#"{"feederPodcast": 88, "segmentTypes": ["a","b"]}"#).unwrap();
        merge_extras(&mut payload, &extras);
        assert_eq!(payload.passthrough["feederPodcast"], json!(88));
        assert_eq!(payload.passthrough["segmentTypes"], json!(["a", "b"]));
    }

    #[test]
    fn test_extras_cannot_shadow_required_fields() {
        let mut payload = sample_payload();
        let extras = parse_extras(r#"{"timestamp": 1, "type": "bogus"}"#).unwrap();
        merge_extras(&mut payload, &extras);
        assert_eq!(payload.timestamp, 1700000000123);
        assert_eq!(payload.kind, "antebytes");
    }
}
