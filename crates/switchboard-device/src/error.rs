//! Device error types.

use crate::state::ConnectionState;
use switchboard_types::error::CodecError;
use switchboard_wire::WireError;
use thiserror::Error;

/// Errors surfaced to the owner of a device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The transport could not be opened or used.
    #[error("Transport error: {0}")]
    Wire(#[from] WireError),

    /// A parameter value could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The operation is not valid in the current connection state.
    #[error("Cannot {operation} while {current}")]
    InvalidState {
        current: ConnectionState,
        operation: &'static str,
    },
}

/// Alias for device results.
pub type DeviceResult<T> = Result<T, DeviceError>;
