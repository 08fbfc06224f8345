//! Configuration types for the broker and devices.
//!
//! Every field has a default, so a partial (or empty) TOML file is valid.

use crate::value::ValueCodec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default broker port, used for both the listen and the dial address.
pub const DEFAULT_PORT: u16 = 5559;

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Broker settings.
    pub broker: BrokerConfig,
    /// Device settings.
    pub device: DeviceConfig,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

/// Broker dispatch loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the TCP router binds.
    pub listen_addr: SocketAddr,
    /// Upper bound on a single inbound poll (milliseconds).
    pub poll_interval_ms: u64,
    /// Interval between connectivity reports (seconds).
    pub report_interval_secs: u64,
    /// Age after which an unanswered request is evicted (seconds).
    pub stale_after_secs: u64,
    /// Send `ERR "request timed out"` to the requester when evicting.
    pub notify_on_timeout: bool,
    /// Fail in-flight requests immediately when their target leaves.
    pub fail_on_leave: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_addr(),
            poll_interval_ms: 20,
            report_interval_secs: 1,
            stale_after_secs: 5,
            notify_on_timeout: true,
            fail_on_leave: true,
        }
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Device connection and queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Broker endpoint for the TCP transport.
    pub broker_addr: SocketAddr,
    /// Upper bound on an inbox poll while joined (milliseconds).
    pub poll_interval_ms: u64,
    /// How long to wait for `OK` before resetting the connection (milliseconds).
    pub join_timeout_ms: u64,
    /// Default per-command timeout, counted from transmission (milliseconds).
    pub command_timeout_ms: u64,
    /// Codec for parameter values.
    pub value_codec: ValueCodec,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            broker_addr: default_addr(),
            poll_interval_ms: 20,
            join_timeout_ms: 1000,
            command_timeout_ms: 1000,
            value_codec: ValueCodec::default(),
        }
    }
}

impl DeviceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
