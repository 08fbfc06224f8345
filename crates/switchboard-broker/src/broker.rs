//! The broker dispatch loop.

use crate::error::{BrokerError, BrokerResult};
use crate::routing::{BrokerCore, Outbound};
use std::collections::VecDeque;
use std::time::Instant;
use switchboard_types::config::BrokerConfig;
use switchboard_wire::{RouterEvent, RouterTransport, WireError};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument, Span};

/// Drives a [`BrokerCore`] over a router transport.
///
/// One tick waits at most `poll_interval` for a single event, delivers what
/// the core produced, reaps stale correlations and, when due, logs the
/// connectivity report.
pub struct Broker<T: RouterTransport> {
    core: BrokerCore,
    transport: T,
    config: BrokerConfig,
    last_report: Instant,
    span: Span,
}

impl<T: RouterTransport> Broker<T> {
    pub fn new(transport: T, config: BrokerConfig) -> Self {
        let span = info_span!("broker", listen = %config.listen_addr);
        Self {
            core: BrokerCore::new(&config),
            transport,
            config,
            last_report: Instant::now(),
            span,
        }
    }

    pub fn core(&self) -> &BrokerCore {
        &self.core
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one step of the loop.
    pub async fn tick(&mut self) -> BrokerResult<()> {
        let span = self.span.clone();
        self.step().instrument(span).await
    }

    /// Tick until `shutdown` turns true.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> BrokerResult<()> {
        info!(parent: &self.span, "broker running");
        while !*shutdown.borrow() {
            self.tick().await?;
        }
        info!(
            parent: &self.span,
            members = self.core.membership().len(),
            in_flight = self.core.correlations().len(),
            "broker stopped"
        );
        Ok(())
    }

    async fn step(&mut self) -> BrokerResult<()> {
        let event = match self.transport.recv_timeout(self.config.poll_interval()).await {
            Ok(event) => event,
            Err(WireError::ConnectionClosed) => return Err(BrokerError::TransportClosed),
            Err(e) => return Err(e.into()),
        };
        match event {
            Some(RouterEvent::Message(envelope)) => {
                let out = self
                    .core
                    .handle(&envelope.from, envelope.frames, Instant::now());
                self.deliver(out).await;
            }
            Some(RouterEvent::Disconnected(addr)) => {
                let out = self.core.link_lost(&addr);
                self.deliver(out).await;
            }
            None => {}
        }

        let now = Instant::now();
        let out = self.core.reap(now);
        self.deliver(out).await;

        if now.saturating_duration_since(self.last_report) >= self.config.report_interval() {
            self.core.report();
            self.last_report = now;
        }
        Ok(())
    }

    async fn deliver(&mut self, outbound: Vec<Outbound>) {
        let mut pending: VecDeque<Outbound> = outbound.into();
        while let Some(out) = pending.pop_front() {
            if let Err(e) = self.transport.send_to(&out.to, out.frames).await {
                warn!(to = %out.to, error = %e, "delivery failed");
                if let Some(id) = out.forward_of {
                    pending.extend(self.core.forward_failed(id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::time::Duration;
    use switchboard_types::protocol::{build, reason};
    use switchboard_types::{Frames, PeerAddr, RequestId, Verb};
    use switchboard_wire::{Envelope, MemoryHub};

    /// Scripted router: replays queued events and records what was sent.
    #[derive(Default)]
    struct ScriptedRouter {
        events: VecDeque<RouterEvent>,
        unreachable: HashSet<PeerAddr>,
        sent: Vec<(PeerAddr, Frames)>,
        closed: bool,
    }

    impl ScriptedRouter {
        fn push(&mut self, from: &str, frames: Frames) {
            self.events.push_back(RouterEvent::Message(Envelope {
                from: PeerAddr::from(from),
                frames,
            }));
        }
    }

    #[async_trait]
    impl RouterTransport for ScriptedRouter {
        async fn recv_timeout(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<RouterEvent>, WireError> {
            match self.events.pop_front() {
                Some(event) => Ok(Some(event)),
                None if self.closed => Err(WireError::ConnectionClosed),
                None => Ok(None),
            }
        }

        async fn send_to(&mut self, to: &PeerAddr, frames: Frames) -> Result<(), WireError> {
            if self.unreachable.contains(to) {
                return Err(WireError::UnknownPeer(to.clone()));
            }
            self.sent.push((to.clone(), frames));
            Ok(())
        }
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_tick_handles_one_event() {
        let mut router = ScriptedRouter::default();
        router.push("A", build::hi());
        router.push("B", build::hi());
        let mut broker = Broker::new(router, BrokerConfig::default());

        broker.tick().await.unwrap();
        assert_eq!(broker.core().membership().len(), 1);
        broker.tick().await.unwrap();
        assert_eq!(broker.core().membership().len(), 2);
        assert_eq!(
            broker.transport().sent,
            vec![
                (PeerAddr::from("A"), build::ok()),
                (PeerAddr::from("B"), build::ok())
            ]
        );
    }

    #[tokio::test]
    async fn test_undeliverable_forward_fails_request() {
        let id = RequestId::from(3u32);
        let mut router = ScriptedRouter::default();
        router.push("A", build::hi());
        router.push("X", build::hi());
        router.push(
            "A",
            build::request(id, &PeerAddr::from("X"), Verb::Get, [b("P")]),
        );
        router.unreachable.insert(PeerAddr::from("X"));
        let mut broker = Broker::new(router, BrokerConfig::default());

        for _ in 0..3 {
            broker.tick().await.unwrap();
        }
        assert!(broker.core().correlations().is_empty());
        let to_a: Vec<&Frames> = broker
            .transport()
            .sent
            .iter()
            .filter(|(to, _)| to == &PeerAddr::from("A"))
            .map(|(_, frames)| frames)
            .collect();
        assert_eq!(to_a.len(), 3);
        assert_eq!(to_a[0], &build::ok());
        assert_eq!(to_a[1][1], b("ACK"));
        assert_eq!(to_a[2], &build::error(id, reason::DEVICE_NOT_CONNECTED));
    }

    #[tokio::test]
    async fn test_disconnect_event_removes_member() {
        let mut router = ScriptedRouter::default();
        router.push("A", build::hi());
        router
            .events
            .push_back(RouterEvent::Disconnected(PeerAddr::from("A")));
        let mut broker = Broker::new(router, BrokerConfig::default());

        broker.tick().await.unwrap();
        broker.tick().await.unwrap();
        assert!(broker.core().membership().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_stops_loop() {
        let router = ScriptedRouter {
            closed: true,
            ..ScriptedRouter::default()
        };
        let mut broker = Broker::new(router, BrokerConfig::default());
        assert!(matches!(
            broker.tick().await,
            Err(BrokerError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let hub = MemoryHub::new();
        let config = BrokerConfig {
            poll_interval_ms: 5,
            ..BrokerConfig::default()
        };
        let mut broker = Broker::new(hub.bind().unwrap(), config);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            broker.run(rx).await.unwrap();
            broker
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let broker = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(broker.core().membership().is_empty());
    }
}
