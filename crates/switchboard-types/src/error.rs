//! Shared error types for the Switchboard system.

use thiserror::Error;

/// A message that does not follow the frame layout of the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message carried no frames at all.
    #[error("Empty message")]
    Empty,

    /// The request ID frame has the wrong length.
    #[error("Malformed request id: expected {expected} bytes, got {actual}")]
    MalformedId {
        /// Required ID length.
        expected: usize,
        /// Length of the frame that was received.
        actual: usize,
    },

    /// A frame the layout requires is absent.
    #[error("Missing {0} frame")]
    MissingFrame(&'static str),

    /// A text frame was not valid UTF-8.
    #[error("Frame '{0}' is not valid UTF-8")]
    NotUtf8(&'static str),
}

/// Failure to encode or decode a parameter value blob.
#[derive(Error, Debug)]
pub enum CodecError {
    /// MessagePack encoding failed.
    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
