//! Value serialization with opportunistic compression.
//!
//! Values are serialized as JSON. Payloads above a configured threshold are
//! Snappy-compressed and prefixed with a fixed marker; the compressed form
//! is kept only when it is genuinely smaller (at least a 20% reduction).
//! That gate is an invariant, not an optimization: a naive transform can
//! expand small or already-dense payloads, and an expanded "compressed"
//! entry would defeat the point of the transform.

use serde::{de::DeserializeOwned, Serialize};
use stratus_core::SerializationError;

/// Marker prefix on stored bytes signaling the payload is compressed.
/// Absence means raw serialized data.
pub const COMPRESSION_MARKER: &[u8] = b"snpy1:";

/// Minimum fraction of the raw size a compressed payload must save.
const MIN_REDUCTION: f64 = 0.20;

/// Serializes cache values and reverses the transform on read.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    compression_threshold: usize,
}

impl ValueCodec {
    /// Create a codec; payloads above `compression_threshold` bytes are
    /// candidates for compression.
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
        }
    }

    /// Serialize a value to store bytes, compressing when worthwhile.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let raw = serde_json::to_vec(value).map_err(|e| SerializationError::Encode {
            reason: e.to_string(),
        })?;

        if raw.len() <= self.compression_threshold {
            return Ok(raw);
        }

        let compressed = snap::raw::Encoder::new()
            .compress_vec(&raw)
            .map_err(|e| SerializationError::Compress {
                reason: e.to_string(),
            })?;

        let framed_len = COMPRESSION_MARKER.len() + compressed.len();
        let max_kept = (raw.len() as f64 * (1.0 - MIN_REDUCTION)) as usize;
        if framed_len > max_kept {
            // Not worth keeping; store the raw serialization.
            return Ok(raw);
        }

        let mut framed = Vec::with_capacity(framed_len);
        framed.extend_from_slice(COMPRESSION_MARKER);
        framed.extend_from_slice(&compressed);
        Ok(framed)
    }

    /// Deserialize store bytes, reversing the transform when the marker is
    /// present.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        let raw: Vec<u8>;
        let payload = match bytes.strip_prefix(COMPRESSION_MARKER) {
            Some(compressed) => {
                raw = snap::raw::Decoder::new()
                    .decompress_vec(compressed)
                    .map_err(|e| SerializationError::Decompress {
                        reason: e.to_string(),
                    })?;
                raw.as_slice()
            }
            None => bytes,
        };

        serde_json::from_slice(payload).map_err(|e| SerializationError::Decode {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_payload_stays_raw() {
        let codec = ValueCodec::new(1024);
        let bytes = codec.encode(&"hello").unwrap();
        assert!(!bytes.starts_with(COMPRESSION_MARKER));
        let back: String = codec.decode(&bytes).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn test_large_compressible_payload_is_marked() {
        let codec = ValueCodec::new(64);
        let value = "repetition ".repeat(200);
        let bytes = codec.encode(&value).unwrap();
        assert!(bytes.starts_with(COMPRESSION_MARKER));
        assert!(bytes.len() < serde_json::to_vec(&value).unwrap().len());
        let back: String = codec.decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        // Hex of a pseudo-random byte stream barely compresses; the 20%
        // gate must reject it even though it is over the threshold.
        let mut state = 0x9e3779b97f4a7c15u64;
        let noise: String = (0..2000)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                char::from_digit(((state >> 60) & 0xf) as u32, 16).unwrap()
            })
            .collect();

        let codec = ValueCodec::new(64);
        let bytes = codec.encode(&noise).unwrap();
        assert!(!bytes.starts_with(COMPRESSION_MARKER));
        let back: String = codec.decode(&bytes).unwrap();
        assert_eq!(back, noise);
    }

    #[test]
    fn test_decode_failure_is_typed() {
        let codec = ValueCodec::new(1024);
        let err = codec.decode::<String>(b"not json at all").unwrap_err();
        assert!(matches!(err, SerializationError::Decode { .. }));

        let mut corrupt = COMPRESSION_MARKER.to_vec();
        corrupt.extend_from_slice(b"\xff\xff\xff");
        let err = codec.decode::<String>(&corrupt).unwrap_err();
        assert!(matches!(err, SerializationError::Decompress { .. }));
    }

    proptest! {
        #[test]
        fn prop_round_trip_any_threshold(value in "\\PC*", threshold in 0usize..4096) {
            let codec = ValueCodec::new(threshold);
            let bytes = codec.encode(&value).unwrap();
            let back: String = codec.decode(&bytes).unwrap();
            prop_assert_eq!(back, value);
        }
    }
}
