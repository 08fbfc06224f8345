//! Connection lifecycle of a device.

use std::fmt;

/// Where a device stands with respect to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport endpoint. Initial and final state.
    Closed,
    /// Endpoint open, `HI` not yet sent.
    Disconnected,
    /// `HI` sent, waiting for `OK`.
    Joining,
    /// Member of the broker; requests flow.
    Joined,
    /// The broker refused the join. No automatic retry.
    Rejected,
    /// Exit requested while a member; `BYE` goes out next.
    Leaving,
    /// Discarding the queue and releasing the endpoint.
    Draining,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Joining => "joining",
            ConnectionState::Joined => "joined",
            ConnectionState::Rejected => "rejected",
            ConnectionState::Leaving => "leaving",
            ConnectionState::Draining => "draining",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one tick of the device loop reports to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Keep ticking.
    Running,
    /// The device is closed; ticking does nothing until `start`.
    Closed,
    /// The broker refused the join. Reported on every tick until the owner
    /// exits the device.
    Rejected,
}

impl LoopStatus {
    /// Numeric status: 0 running, 1 closed, -1 rejected.
    pub fn code(&self) -> i32 {
        match self {
            LoopStatus::Running => 0,
            LoopStatus::Closed => 1,
            LoopStatus::Rejected => -1,
        }
    }

    pub(crate) fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Closed => LoopStatus::Closed,
            ConnectionState::Rejected => LoopStatus::Rejected,
            _ => LoopStatus::Running,
        }
    }
}
