//! Pluggable payload serialization.
//!
//! The core never interprets payload bytes itself; WORK/OK/ERROR payloads
//! pass through a [`Codec`] chosen at peer construction. Control frames
//! (HELLO and friends) bypass the codec and carry raw bytes.

use palaver_types::PalaverError;

/// The dynamic value model payloads are expressed in.
pub use serde_json::Value;

/// Encode/decode boundary for WORK/OK/ERROR payloads.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, PalaverError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, PalaverError>;
    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// MessagePack codec (the default).
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, PalaverError> {
        rmp_serde::to_vec(value).map_err(|e| PalaverError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, PalaverError> {
        rmp_serde::from_slice(bytes).map_err(|e| PalaverError::Codec(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}

/// JSON codec, for interoperability and debugging by eyeball.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, PalaverError> {
        serde_json::to_vec(value).map_err(|e| PalaverError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, PalaverError> {
        serde_json::from_slice(bytes).map_err(|e| PalaverError::Codec(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
