//! Broker error types.

use switchboard_wire::WireError;
use thiserror::Error;

/// Errors that stop the broker loop.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The transport failed.
    #[error("Transport error: {0}")]
    Wire(#[from] WireError),

    /// The transport will deliver no more events.
    #[error("Transport closed")]
    TransportClosed,
}

/// Alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;
