//! In-process transport over tokio channels.
//!
//! A [`MemoryHub`] plays the role of a bound router endpoint: the broker
//! takes the router half once with [`MemoryHub::bind`], and any number of
//! devices dial it through [`MemoryHub::connector`]. Addressing, replacement
//! of a reconnecting identity (reported as a disconnect of the old link) and
//! bounded per-link queues behave like the TCP transport, so the protocol
//! logic can be exercised without sockets.

use crate::transport::{
    Connector, DealerLink, Envelope, RouterEvent, RouterTransport, WireError, LINK_QUEUE_DEPTH,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard_types::{Frames, PeerAddr};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

struct LinkSlot {
    id: u64,
    tx: mpsc::Sender<Frames>,
}

struct HubInner {
    router_tx: mpsc::UnboundedSender<RouterEvent>,
    router_rx: Mutex<Option<mpsc::UnboundedReceiver<RouterEvent>>>,
    links: DashMap<PeerAddr, LinkSlot>,
    next_link: AtomicU64,
}

/// Shared rendezvous point for one router and its dealers.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create a hub with no router bound yet. Dealers may connect and send
    /// before the router is taken; their messages are buffered.
    pub fn new() -> Self {
        let (router_tx, router_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HubInner {
                router_tx,
                router_rx: Mutex::new(Some(router_rx)),
                links: DashMap::new(),
                next_link: AtomicU64::new(1),
            }),
        }
    }

    /// Take the router half. Only one router may be bound per hub.
    pub fn bind(&self) -> Result<MemoryRouter, WireError> {
        let rx = self
            .inner
            .router_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WireError::AddressInUse)?;
        Ok(MemoryRouter {
            rx,
            hub: Arc::clone(&self.inner),
        })
    }

    /// A connector that dials this hub.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            hub: Arc::clone(&self.inner),
        }
    }

    /// Number of live dealer links.
    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Router half of a [`MemoryHub`].
pub struct MemoryRouter {
    rx: mpsc::UnboundedReceiver<RouterEvent>,
    hub: Arc<HubInner>,
}

#[async_trait]
impl RouterTransport for MemoryRouter {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RouterEvent>, WireError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(WireError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn send_to(&mut self, to: &PeerAddr, frames: Frames) -> Result<(), WireError> {
        let slot = self
            .hub
            .links
            .get(to)
            .ok_or_else(|| WireError::UnknownPeer(to.clone()))?;
        slot.tx.try_send(frames).map_err(|e| match e {
            TrySendError::Full(_) => WireError::QueueFull(to.clone()),
            TrySendError::Closed(_) => WireError::UnknownPeer(to.clone()),
        })
    }
}

/// Dials a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<HubInner>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, identity: &PeerAddr) -> Result<Box<dyn DealerLink>, WireError> {
        let (tx, rx) = mpsc::channel(LINK_QUEUE_DEPTH);
        let id = self.hub.next_link.fetch_add(1, Ordering::Relaxed);
        if self
            .hub
            .links
            .insert(identity.clone(), LinkSlot { id, tx })
            .is_some()
        {
            debug!(identity = %identity, "memory link replaced an older link");
            let _ = self
                .hub
                .router_tx
                .send(RouterEvent::Disconnected(identity.clone()));
        }
        Ok(Box::new(MemoryLink {
            identity: identity.clone(),
            id,
            rx,
            hub: Arc::clone(&self.hub),
        }))
    }
}

/// Dealer half of a [`MemoryHub`] connection.
struct MemoryLink {
    identity: PeerAddr,
    id: u64,
    rx: mpsc::Receiver<Frames>,
    hub: Arc<HubInner>,
}

#[async_trait]
impl DealerLink for MemoryLink {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frames>, WireError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frames)) => Ok(Some(frames)),
            Ok(None) => Err(WireError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn send(&mut self, frames: Frames) -> Result<(), WireError> {
        self.hub
            .router_tx
            .send(RouterEvent::Message(Envelope {
                from: self.identity.clone(),
                frames,
            }))
            .map_err(|_| WireError::ConnectionClosed)
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        let id = self.id;
        if self
            .hub
            .links
            .remove_if(&self.identity, |_, slot| slot.id == id)
            .is_some()
        {
            let _ = self
                .hub
                .router_tx
                .send(RouterEvent::Disconnected(self.identity.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const WAIT: Duration = Duration::from_millis(200);

    fn msg(parts: &[&'static str]) -> Frames {
        parts
            .iter()
            .copied()
            .map(|p| Bytes::from_static(p.as_bytes()))
            .collect()
    }

    #[tokio::test]
    async fn test_dealer_to_router_and_back() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let mut link = hub.connector().connect(&PeerAddr::from("JOE")).await.unwrap();

        link.send(msg(&["HI"])).await.unwrap();
        let event = router.recv_timeout(WAIT).await.unwrap().unwrap();
        assert_eq!(
            event,
            RouterEvent::Message(Envelope {
                from: PeerAddr::from("JOE"),
                frames: msg(&["HI"]),
            })
        );

        router
            .send_to(&PeerAddr::from("JOE"), msg(&["OK"]))
            .await
            .unwrap();
        assert_eq!(link.recv_timeout(WAIT).await.unwrap(), Some(msg(&["OK"])));
    }

    #[tokio::test]
    async fn test_bind_twice_fails() {
        let hub = MemoryHub::new();
        let _router = hub.bind().unwrap();
        assert!(matches!(hub.bind(), Err(WireError::AddressInUse)));
    }

    #[tokio::test]
    async fn test_recv_timeout_elapses() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let mut link = hub.connector().connect(&PeerAddr::from("A")).await.unwrap();
        assert!(router
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
        assert!(link
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let err = router
            .send_to(&PeerAddr::from("NOBODY"), msg(&["OK"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_drop_reports_disconnect() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let link = hub.connector().connect(&PeerAddr::from("A")).await.unwrap();
        assert_eq!(hub.link_count(), 1);
        drop(link);
        assert_eq!(hub.link_count(), 0);
        assert_eq!(
            router.recv_timeout(WAIT).await.unwrap(),
            Some(RouterEvent::Disconnected(PeerAddr::from("A")))
        );
    }

    #[tokio::test]
    async fn test_reconnect_replaces_old_link() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let connector = hub.connector();
        let mut old = connector.connect(&PeerAddr::from("A")).await.unwrap();
        let mut new = connector.connect(&PeerAddr::from("A")).await.unwrap();
        assert_eq!(
            router.recv_timeout(WAIT).await.unwrap(),
            Some(RouterEvent::Disconnected(PeerAddr::from("A")))
        );

        // The replaced link observes closure; dropping it must not
        // disconnect the identity now owned by the newer link.
        assert!(matches!(
            old.recv_timeout(WAIT).await,
            Err(WireError::ConnectionClosed)
        ));
        drop(old);
        assert_eq!(hub.link_count(), 1);

        router
            .send_to(&PeerAddr::from("A"), msg(&["OK"]))
            .await
            .unwrap();
        assert_eq!(new.recv_timeout(WAIT).await.unwrap(), Some(msg(&["OK"])));
        assert!(router
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_full_link_queue_fails_send() {
        let hub = MemoryHub::new();
        let mut router = hub.bind().unwrap();
        let mut link = hub.connector().connect(&PeerAddr::from("A")).await.unwrap();
        for _ in 0..LINK_QUEUE_DEPTH {
            router
                .send_to(&PeerAddr::from("A"), msg(&["RET"]))
                .await
                .unwrap();
        }
        assert!(matches!(
            router.send_to(&PeerAddr::from("A"), msg(&["RET"])).await,
            Err(WireError::QueueFull(_))
        ));

        // Draining one message frees one slot.
        assert_eq!(link.recv_timeout(WAIT).await.unwrap(), Some(msg(&["RET"])));
        router
            .send_to(&PeerAddr::from("A"), msg(&["RET"]))
            .await
            .unwrap();
    }
}
