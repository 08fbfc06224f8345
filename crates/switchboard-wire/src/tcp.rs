//! TCP transport.
//!
//! A [`TcpRouter`] binds a listener and accepts dealer connections. The first
//! message on every connection is a greeting carrying a single frame, the
//! dealer's identity; every later message is delivered to the router tagged
//! with that identity. A newer connection under the same identity replaces
//! the older link, and the router reports the old one as disconnected.
//!
//! A [`TcpConnector`] dials the router, sends the greeting and hands back a
//! [`DealerLink`] whose reads are served by a background task.

use crate::message::{read_frames, write_frames};
use crate::transport::{
    Connector, DealerLink, Envelope, RouterEvent, RouterTransport, WireError, LINK_QUEUE_DEPTH,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_types::config::DeviceConfig;
use switchboard_types::{Frames, PeerAddr};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a fresh connection has to send its identity greeting.
const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

struct LinkSlot {
    id: u64,
    tx: mpsc::Sender<Frames>,
}

type LinkTable = Arc<DashMap<PeerAddr, LinkSlot>>;

/// Broker-side TCP endpoint.
pub struct TcpRouter {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<RouterEvent>,
    links: LinkTable,
    accept_task: JoinHandle<()>,
    /// Dropping this ends every connection task.
    _shutdown: watch::Sender<bool>,
}

impl TcpRouter {
    /// Bind the listener and start accepting connections.
    pub async fn bind(addr: SocketAddr) -> Result<Self, WireError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "router listening");

        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let links: LinkTable = Arc::new(DashMap::new());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&links),
            events_tx,
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            events,
            links,
            accept_task,
            _shutdown: shutdown_tx,
        })
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live dealer connections.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Drop for TcpRouter {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl RouterTransport for TcpRouter {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RouterEvent>, WireError> {
        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(WireError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn send_to(&mut self, to: &PeerAddr, frames: Frames) -> Result<(), WireError> {
        let slot = self
            .links
            .get(to)
            .ok_or_else(|| WireError::UnknownPeer(to.clone()))?;
        slot.tx.try_send(frames).map_err(|e| match e {
            TrySendError::Full(_) => WireError::QueueFull(to.clone()),
            TrySendError::Closed(_) => WireError::UnknownPeer(to.clone()),
        })
    }
}

/// Accept loop, runs in a spawned task.
async fn accept_loop(
    listener: TcpListener,
    links: LinkTable,
    events: mpsc::UnboundedSender<RouterEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let next_link = AtomicU64::new(1);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "accepted connection");
                let link_id = next_link.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    link_id,
                    Arc::clone(&links),
                    events.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Handle one dealer connection: read the greeting, register the link, then
/// pump inbound messages into the router's event queue.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    link_id: u64,
    links: LinkTable,
    events: mpsc::UnboundedSender<RouterEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
    }
    let (mut reader, mut writer) = stream.into_split();

    let identity = match tokio::time::timeout(GREETING_TIMEOUT, read_frames(&mut reader)).await {
        Ok(Ok(frames)) if frames.len() == 1 && !frames[0].is_empty() => {
            PeerAddr::from_bytes(frames[0].clone())
        }
        Ok(Ok(frames)) => {
            warn!(
                peer = %addr,
                frames = frames.len(),
                "connection did not open with an identity greeting"
            );
            return;
        }
        Ok(Err(e)) => {
            debug!(peer = %addr, error = %e, "connection closed before greeting");
            return;
        }
        Err(_) => {
            warn!(peer = %addr, "timed out waiting for identity greeting");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Frames>(LINK_QUEUE_DEPTH);
    if links
        .insert(identity.clone(), LinkSlot { id: link_id, tx })
        .is_some()
    {
        info!(identity = %identity, peer = %addr, "newer connection replaced existing link");
        if events.send(RouterEvent::Disconnected(identity.clone())).is_err() {
            return;
        }
    } else {
        debug!(identity = %identity, peer = %addr, "link established");
    }

    let writer_identity = identity.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frames) = rx.recv().await {
            if let Err(e) = write_frames(&mut writer, &frames).await {
                debug!(identity = %writer_identity, error = %e, "write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = read_frames(&mut reader) => match result {
                Ok(frames) => {
                    let event = RouterEvent::Message(Envelope {
                        from: identity.clone(),
                        frames,
                    });
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(WireError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(identity = %identity, error = %e, "dropping connection after read error");
                    break;
                }
            },
        }
    }

    writer_task.abort();
    if links
        .remove_if(&identity, |_, slot| slot.id == link_id)
        .is_some()
    {
        debug!(identity = %identity, "link closed");
        let _ = events.send(RouterEvent::Disconnected(identity));
    }
}

/// Dials a [`TcpRouter`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    broker_addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(broker_addr: SocketAddr) -> Self {
        Self { broker_addr }
    }

    /// Dial the broker named in the device configuration.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.broker_addr)
    }

    pub fn broker_addr(&self) -> SocketAddr {
        self.broker_addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, identity: &PeerAddr) -> Result<Box<dyn DealerLink>, WireError> {
        debug!(broker = %self.broker_addr, identity = %identity, "connecting");
        let stream = TcpStream::connect(self.broker_addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        write_frames(&mut writer, &[identity.to_frame()]).await?;

        let (tx, rx) = mpsc::channel(LINK_QUEUE_DEPTH);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frames(&mut reader).await {
                    Ok(frames) => {
                        if tx.send(frames).await.is_err() {
                            break;
                        }
                    }
                    Err(WireError::ConnectionClosed) => break,
                    Err(e) => {
                        debug!(error = %e, "dealer read failed");
                        break;
                    }
                }
            }
        });

        Ok(Box::new(TcpLink {
            writer,
            rx,
            reader_task,
        }))
    }
}

/// Dealer side of a TCP connection.
struct TcpLink {
    writer: OwnedWriteHalf,
    rx: mpsc::Receiver<Frames>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl DealerLink for TcpLink {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frames>, WireError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frames)) => Ok(Some(frames)),
            Ok(None) => Err(WireError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn send(&mut self, frames: Frames) -> Result<(), WireError> {
        write_frames(&mut self.writer, &frames).await
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
