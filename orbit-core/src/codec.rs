//! Pluggable message serialization.
//!
//! The [`MessageCodec`] trait lets the embedding application bring its own
//! wire format (JSON, bincode, protobuf, …) while the runtime ships a default
//! [`JsonCodec`]. Invocation arguments are dynamic values, so only whole
//! messages pass through the codec; a locally dispatched invocation never
//! touches it.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable message serialization format.
///
/// Implementations must be cheap to clone; the pipeline's serialization step
/// holds one instance per stage.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using `serde_json`.
///
/// The default codec: human-readable and convenient for debugging. Swap in a
/// binary codec for production traffic volumes.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        label: String,
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let msg = Sample {
            id: 7,
            label: "seven".to_string(),
        };
        let bytes = codec.encode(&msg).expect("encode");
        let decoded: Sample = codec.decode(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_decode_error() {
        let codec = JsonCodec;
        let result: Result<Sample, CodecError> = codec.decode(b"not json {");
        let err = result.expect_err("should fail");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let codec = JsonCodec;
        let bytes = codec.encode(&vec![1, 2, 3]).expect("encode");
        let result: Result<Sample, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }
}
