//! Transport traits shared by the broker and devices.
//!
//! The broker owns one [`RouterTransport`]: it receives every message tagged
//! with the sender's identity and can address any identity it has seen.
//! Each device owns one [`DealerLink`], created through a [`Connector`] so the
//! device can tear it down and dial again.

use async_trait::async_trait;
use std::time::Duration;
use switchboard_types::{Frames, PeerAddr};
use thiserror::Error;

/// Messages buffered per link before sends toward it start failing.
pub const LINK_QUEUE_DEPTH: usize = 1024;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u32 },
    #[error("Too many frames: {count} (max {max})")]
    TooManyFrames { count: usize, max: usize },
    #[error("Malformed message: {0}")]
    Malformed(&'static str),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerAddr),
    #[error("Send queue full for peer: {0}")]
    QueueFull(PeerAddr),
    #[error("Address already in use")]
    AddressInUse,
    #[error("Not connected")]
    NotConnected,
}

/// A message delivered to the router, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Transport-supplied sender identity.
    pub from: PeerAddr,
    /// Application frames.
    pub frames: Frames,
}

/// What a router can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A peer sent a message.
    Message(Envelope),
    /// The link for this identity went away, or a newer connection under the
    /// same identity replaced it. A replacement is reported before any
    /// message from the new link.
    Disconnected(PeerAddr),
}

/// Broker-side endpoint.
#[async_trait]
pub trait RouterTransport: Send {
    /// Wait at most `timeout` for the next event. `Ok(None)` means the wait
    /// elapsed with nothing to deliver.
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RouterEvent>, WireError>;

    /// Send a message to a previously seen identity.
    async fn send_to(&mut self, to: &PeerAddr, frames: Frames) -> Result<(), WireError>;
}

/// Device-side endpoint, connected to exactly one router.
#[async_trait]
pub trait DealerLink: Send {
    /// Wait at most `timeout` for the next message. `Ok(None)` means the
    /// wait elapsed; `Err(ConnectionClosed)` means the link is gone.
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frames>, WireError>;

    /// Send a message to the router.
    async fn send(&mut self, frames: Frames) -> Result<(), WireError>;
}

/// Dials the router and produces a fresh link under a given identity.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, identity: &PeerAddr) -> Result<Box<dyn DealerLink>, WireError>;
}
