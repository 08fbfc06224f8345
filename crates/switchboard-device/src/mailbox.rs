//! The device's single transport endpoint.

use std::sync::Arc;
use std::time::Duration;
use switchboard_types::{Frames, PeerAddr};
use switchboard_wire::{Connector, DealerLink, WireError};
use tracing::debug;

/// Owns the link to the broker and knows how to rebuild it.
///
/// Resetting drops the current link, which tells the broker the old
/// connection is gone, and dials again under the same identity.
pub struct Mailbox {
    identity: PeerAddr,
    connector: Arc<dyn Connector>,
    link: Option<Box<dyn DealerLink>>,
}

impl Mailbox {
    pub fn new(identity: PeerAddr, connector: Arc<dyn Connector>) -> Self {
        Self {
            identity,
            connector,
            link: None,
        }
    }

    pub fn identity(&self) -> &PeerAddr {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Dial the broker unless a link is already open.
    pub async fn open(&mut self) -> Result<(), WireError> {
        if self.link.is_none() {
            self.link = Some(self.connector.connect(&self.identity).await?);
            debug!(identity = %self.identity, "mailbox opened");
        }
        Ok(())
    }

    /// Drop the link, if any.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            debug!(identity = %self.identity, "mailbox closed");
        }
    }

    /// Drop the link and dial again.
    pub async fn reset(&mut self) -> Result<(), WireError> {
        self.close();
        self.open().await
    }

    pub async fn send(&mut self, frames: Frames) -> Result<(), WireError> {
        let link = self.link.as_mut().ok_or(WireError::NotConnected)?;
        link.send(frames).await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frames>, WireError> {
        let link = self.link.as_mut().ok_or(WireError::NotConnected)?;
        link.recv_timeout(timeout).await
    }
}
