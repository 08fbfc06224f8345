//! Parameter value blob codec.
//!
//! Values cross the wire as a single opaque frame. The broker never looks
//! inside; devices on both ends must agree on the codec.

use crate::error::CodecError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How parameter values are turned into frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCodec {
    /// MessagePack (compact, binary).
    #[default]
    #[serde(alias = "msgpack")]
    MsgPack,
    /// JSON text.
    Json,
}

impl ValueCodec {
    /// Encode a value into a frame.
    pub fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let bytes = match self {
            ValueCodec::MsgPack => rmp_serde::to_vec(value)?,
            ValueCodec::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode a frame into a value.
    pub fn decode(&self, frame: &[u8]) -> Result<Value, CodecError> {
        match self {
            ValueCodec::MsgPack => Ok(rmp_serde::from_slice(frame)?),
            ValueCodec::Json => Ok(serde_json::from_slice(frame)?),
        }
    }
}
