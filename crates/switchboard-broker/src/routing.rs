//! Routing rules of the broker, independent of any transport.
//!
//! Every entry point takes what happened and returns the messages to send.
//! The caller owns delivery; if a forward to a target cannot be delivered it
//! reports back through [`BrokerCore::forward_failed`].

use crate::correlation::{CorrelationEntry, CorrelationStore};
use crate::membership::Membership;
use std::time::{Duration, Instant};
use switchboard_types::config::BrokerConfig;
use switchboard_types::protocol::{build, display_frames, reason, BrokerInbound};
use switchboard_types::{Frames, PeerAddr, RequestId, Verb};
use tracing::{debug, error, info, warn};

/// A message the broker wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerAddr,
    pub frames: Frames,
    /// Set when this forwards a new request to its target.
    pub forward_of: Option<RequestId>,
}

impl Outbound {
    fn reply(to: PeerAddr, frames: Frames) -> Self {
        Self {
            to,
            frames,
            forward_of: None,
        }
    }

    fn forward(to: PeerAddr, frames: Frames, id: RequestId) -> Self {
        Self {
            to,
            frames,
            forward_of: Some(id),
        }
    }
}

/// Why a member is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Bye,
    LinkLost,
}

/// Membership and correlation state plus the rules that drive them.
#[derive(Debug, Clone)]
pub struct BrokerCore {
    membership: Membership,
    correlations: CorrelationStore,
    stale_after: Duration,
    notify_on_timeout: bool,
    fail_on_leave: bool,
}

impl BrokerCore {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            membership: Membership::new(),
            correlations: CorrelationStore::new(),
            stale_after: config.stale_after(),
            notify_on_timeout: config.notify_on_timeout,
            fail_on_leave: config.fail_on_leave,
        }
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn correlations(&self) -> &CorrelationStore {
        &self.correlations
    }

    /// Process one message from `from`.
    pub fn handle(&mut self, from: &PeerAddr, frames: Frames, now: Instant) -> Vec<Outbound> {
        debug!(from = %from, frames = %display_frames(&frames), "inbound");
        match BrokerInbound::parse(frames) {
            Ok(BrokerInbound::Join) => self.join(from),
            Ok(BrokerInbound::Leave) => self.leave(from, Departure::Bye),
            Ok(BrokerInbound::Tagged { id, rest }) => {
                if self.correlations.contains(&id) {
                    self.resolve(from, id, rest)
                } else {
                    self.forward(from, id, rest, now)
                }
            }
            Err(e) => {
                warn!(from = %from, error = %e, "dropping malformed message");
                Vec::new()
            }
        }
    }

    /// The transport lost the link to `addr`. Treated like `BYE`.
    pub fn link_lost(&mut self, addr: &PeerAddr) -> Vec<Outbound> {
        self.leave(addr, Departure::LinkLost)
    }

    /// Evict entries older than the staleness threshold.
    pub fn reap(&mut self, now: Instant) -> Vec<Outbound> {
        let stale = self.correlations.sweep_stale(now, self.stale_after);
        stale
            .into_iter()
            .filter_map(|(id, entry)| {
                warn!(
                    id = %id,
                    requester = %entry.requester,
                    target = %entry.target,
                    age_ms = entry.age(now).as_millis() as u64,
                    "request went stale"
                );
                (self.notify_on_timeout && self.membership.contains(&entry.requester))
                    .then(|| Outbound::reply(entry.requester, build::error(id, reason::REQUEST_TIMED_OUT)))
            })
            .collect()
    }

    /// A forward produced by [`BrokerCore::handle`] could not be delivered.
    pub fn forward_failed(&mut self, id: RequestId) -> Vec<Outbound> {
        let Some(entry) = self.correlations.remove(&id) else {
            return Vec::new();
        };
        warn!(id = %id, target = %entry.target, "target unreachable, request dropped");
        self.notify(entry.requester, id, reason::DEVICE_NOT_CONNECTED)
    }

    /// Log membership and in-flight requests.
    pub fn report(&self) {
        let members: Vec<String> = self
            .membership
            .addrs()
            .iter()
            .map(|a| a.to_string())
            .collect();
        info!(
            members = ?members,
            in_flight = self.correlations.len(),
            "connectivity report"
        );
        if !self.correlations.is_empty() {
            debug!("correlation table\n{}", self.correlations);
        }
    }

    fn join(&mut self, from: &PeerAddr) -> Vec<Outbound> {
        if self.membership.join(from.clone()) {
            info!(peer = %from, members = self.membership.len(), "peer joined");
            vec![Outbound::reply(from.clone(), build::ok())]
        } else {
            warn!(peer = %from, "duplicate join refused");
            vec![Outbound::reply(
                from.clone(),
                build::refused(reason::ALREADY_CONNECTED),
            )]
        }
    }

    fn leave(&mut self, from: &PeerAddr, departure: Departure) -> Vec<Outbound> {
        if self.membership.leave(from).is_none() {
            match departure {
                Departure::Bye => warn!(peer = %from, "leave from non-member ignored"),
                Departure::LinkLost => debug!(peer = %from, "link lost for non-member"),
            }
            return Vec::new();
        }
        info!(
            peer = %from,
            departure = ?departure,
            members = self.membership.len(),
            "peer left"
        );
        if !self.fail_on_leave {
            return Vec::new();
        }
        let abandoned = self.correlations.remove_target(from);
        let mut out = Vec::new();
        for (id, entry) in abandoned {
            warn!(id = %id, requester = %entry.requester, target = %from, "target left, request failed");
            out.extend(self.notify(entry.requester, id, reason::DEVICE_DISCONNECTED));
        }
        out
    }

    /// A tagged message with no live entry: a new request
    /// `[target, verb, args..]`.
    fn forward(
        &mut self,
        from: &PeerAddr,
        id: RequestId,
        rest: Frames,
        now: Instant,
    ) -> Vec<Outbound> {
        if !self.membership.contains(from) {
            warn!(id = %id, from = %from, "request from non-member refused");
            return vec![Outbound::reply(
                from.clone(),
                build::error(id, reason::NOT_JOINED),
            )];
        }
        let (Some(target_frame), Some(verb_frame)) = (rest.first(), rest.get(1)) else {
            warn!(id = %id, from = %from, frames = %display_frames(&rest), "dropping request without target or verb");
            return Vec::new();
        };
        let target = PeerAddr::from_bytes(target_frame.clone());
        if !self.membership.contains(&target) {
            warn!(id = %id, from = %from, target = %target, "target not connected");
            return vec![Outbound::reply(
                from.clone(),
                build::error(id, reason::DEVICE_NOT_CONNECTED),
            )];
        }
        let verb = match Verb::parse(verb_frame) {
            Some(verb) if verb.is_request() => verb,
            _ => {
                warn!(
                    id = %id,
                    from = %from,
                    verb = %String::from_utf8_lossy(verb_frame),
                    "command not understood"
                );
                return vec![Outbound::reply(
                    from.clone(),
                    build::error(id, reason::COMMAND_NOT_UNDERSTOOD),
                )];
            }
        };

        let ack = build::tagged(id, Verb::Ack, rest.iter().cloned());
        let mut forward = Vec::with_capacity(rest.len());
        forward.push(id.to_frame());
        forward.extend(rest[1..].iter().cloned());

        self.correlations.insert(
            id,
            CorrelationEntry {
                requester: from.clone(),
                target: target.clone(),
                created_at: now,
                payload: rest,
            },
        );
        info!(id = %id, from = %from, target = %target, verb = verb.as_str(), "forwarding request");

        vec![
            Outbound::reply(from.clone(), ack),
            Outbound::forward(target, forward, id),
        ]
    }

    /// A tagged message matching a live entry: the target's reply.
    fn resolve(&mut self, from: &PeerAddr, id: RequestId, rest: Frames) -> Vec<Outbound> {
        let Some(target) = self.correlations.get(&id).map(|e| e.target.clone()) else {
            return Vec::new();
        };
        if &target != from {
            error!(
                id = %id,
                from = %from,
                expected = %target,
                "reply from a peer other than the target dropped"
            );
            return Vec::new();
        }
        let Some(entry) = self.correlations.remove(&id) else {
            return Vec::new();
        };

        let frames = match rest.first().and_then(|f| Verb::parse(f)) {
            Some(verb) if verb.is_reply() => {
                let mut frames = Vec::with_capacity(rest.len() + 1);
                frames.push(id.to_frame());
                frames.extend(rest);
                frames
            }
            _ => {
                warn!(
                    id = %id,
                    target = %from,
                    frames = %display_frames(&rest),
                    "target replied poorly"
                );
                build::error(id, reason::DEVICE_REPLIED_POORLY)
            }
        };

        if !self.membership.contains(&entry.requester) {
            warn!(id = %id, requester = %entry.requester, "requester gone, reply dropped");
            return Vec::new();
        }
        info!(id = %id, requester = %entry.requester, target = %from, "reply forwarded");
        vec![Outbound::reply(entry.requester, frames)]
    }

    /// `[id, ERR, reason]` to `requester` if it is still a member.
    fn notify(&self, requester: PeerAddr, id: RequestId, why: &str) -> Vec<Outbound> {
        if self.membership.contains(&requester) {
            vec![Outbound::reply(requester, build::error(id, why))]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn addr(s: &str) -> PeerAddr {
        PeerAddr::from(s)
    }

    fn id(n: u32) -> RequestId {
        RequestId::from(n)
    }

    fn core() -> BrokerCore {
        BrokerCore::new(&BrokerConfig::default())
    }

    /// A core with `names` already joined.
    fn core_with(names: &[&str]) -> BrokerCore {
        let mut core = core();
        for name in names {
            assert_eq!(
                core.handle(&addr(name), build::hi(), Instant::now()),
                vec![Outbound::reply(addr(name), build::ok())]
            );
        }
        core
    }

    fn get_request(n: u32, target: &str, param: &str) -> Frames {
        build::request(id(n), &addr(target), Verb::Get, [b(param)])
    }

    #[test]
    fn test_duplicate_join_refused() {
        let mut core = core_with(&["A"]);
        let out = core.handle(&addr("A"), build::hi(), Instant::now());
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::refused(reason::ALREADY_CONNECTED)
            )]
        );
        assert_eq!(core.membership().len(), 1);
    }

    #[test]
    fn test_bye_from_non_member_ignored() {
        let mut core = core_with(&["A"]);
        assert!(core.handle(&addr("B"), build::bye(), Instant::now()).is_empty());
        assert!(core.handle(&addr("A"), build::bye(), Instant::now()).is_empty());
        assert!(core.membership().is_empty());
    }

    #[test]
    fn test_request_to_non_member_target() {
        let mut core = core_with(&["A"]);
        let out = core.handle(&addr("A"), get_request(1, "X", "P"), Instant::now());
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::error(id(1), reason::DEVICE_NOT_CONNECTED)
            )]
        );
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_request_from_non_member() {
        let mut core = core_with(&["X"]);
        let out = core.handle(&addr("A"), get_request(1, "X", "P"), Instant::now());
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::error(id(1), reason::NOT_JOINED)
            )]
        );
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_unknown_verb_not_understood() {
        let mut core = core_with(&["A", "X"]);
        let frames = build::request(id(1), &addr("X"), Verb::Ret, [b("P")]);
        let out = core.handle(&addr("A"), frames, Instant::now());
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::error(id(1), reason::COMMAND_NOT_UNDERSTOOD)
            )]
        );
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_malformed_request_dropped() {
        let mut core = core_with(&["A"]);
        assert!(core
            .handle(&addr("A"), vec![id(1).to_frame()], Instant::now())
            .is_empty());
        assert!(core
            .handle(&addr("A"), vec![b("NOPE")], Instant::now())
            .is_empty());
        assert!(core.handle(&addr("A"), Vec::new(), Instant::now()).is_empty());
    }

    #[test]
    fn test_request_forwarded_and_acked() {
        let mut core = core_with(&["A", "X"]);
        let out = core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        assert_eq!(
            out,
            vec![
                Outbound::reply(
                    addr("A"),
                    vec![id(7).to_frame(), b("ACK"), b("X"), b("GET"), b("P")]
                ),
                Outbound::forward(addr("X"), vec![id(7).to_frame(), b("GET"), b("P")], id(7)),
            ]
        );
        let entry = core.correlations().get(&id(7)).unwrap();
        assert_eq!(entry.requester, addr("A"));
        assert_eq!(entry.target, addr("X"));
        assert_eq!(entry.payload, vec![b("X"), b("GET"), b("P")]);
    }

    #[test]
    fn test_reply_routed_back_and_entry_evicted() {
        let mut core = core_with(&["A", "X"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());

        let reply = build::tagged(id(7), Verb::Ret, [b("P"), b("4.0")]);
        let out = core.handle(&addr("X"), reply.clone(), Instant::now());
        assert_eq!(out, vec![Outbound::reply(addr("A"), reply)]);
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_reply_from_wrong_peer_dropped() {
        let mut core = core_with(&["A", "X", "Y"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        let before = core.correlations().get(&id(7)).cloned();

        let reply = build::tagged(id(7), Verb::Ret, [b("P"), b("1")]);
        assert!(core.handle(&addr("Y"), reply, Instant::now()).is_empty());
        assert_eq!(core.correlations().get(&id(7)).cloned(), before);

        // The legitimate reply still gets through.
        let reply = build::tagged(id(7), Verb::Ret, [b("P"), b("4.0")]);
        assert_eq!(core.handle(&addr("X"), reply, Instant::now()).len(), 1);
    }

    #[test]
    fn test_poor_reply_becomes_error() {
        let mut core = core_with(&["A", "X"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        let out = core.handle(
            &addr("X"),
            build::tagged(id(7), Verb::Hi, []),
            Instant::now(),
        );
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::error(id(7), reason::DEVICE_REPLIED_POORLY)
            )]
        );
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_reply_for_departed_requester_dropped() {
        let mut core = core_with(&["A", "X"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        core.handle(&addr("A"), build::bye(), Instant::now());

        let reply = build::tagged(id(7), Verb::Ret, [b("P"), b("4.0")]);
        assert!(core.handle(&addr("X"), reply, Instant::now()).is_empty());
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_reap_notifies_and_is_idempotent() {
        let mut core = core_with(&["A", "X"]);
        let start = Instant::now();
        core.handle(&addr("A"), get_request(7, "X", "P"), start);

        assert!(core.reap(start + Duration::from_secs(5)).is_empty());
        let later = start + Duration::from_secs(6);
        assert_eq!(
            core.reap(later),
            vec![Outbound::reply(
                addr("A"),
                build::error(id(7), reason::REQUEST_TIMED_OUT)
            )]
        );
        assert!(core.reap(later).is_empty());
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_reap_departed_requester_evicts_silently() {
        let mut core = core_with(&["A", "X"]);
        let start = Instant::now();
        core.handle(&addr("A"), get_request(7, "X", "P"), start);
        assert!(core.handle(&addr("A"), build::bye(), start).is_empty());
        assert!(core.correlations().contains(&id(7)));

        assert!(core.reap(start + Duration::from_secs(6)).is_empty());
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_reap_silent_when_not_notifying() {
        let config = BrokerConfig {
            notify_on_timeout: false,
            ..BrokerConfig::default()
        };
        let mut core = BrokerCore::new(&config);
        let now = Instant::now();
        core.handle(&addr("A"), build::hi(), now);
        core.handle(&addr("X"), build::hi(), now);
        core.handle(&addr("A"), get_request(7, "X", "P"), now);

        assert!(core.reap(now + Duration::from_secs(6)).is_empty());
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_target_leaving_fails_requests() {
        let mut core = core_with(&["A", "X"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        let out = core.handle(&addr("X"), build::bye(), Instant::now());
        assert_eq!(
            out,
            vec![Outbound::reply(
                addr("A"),
                build::error(id(7), reason::DEVICE_DISCONNECTED)
            )]
        );
        assert!(core.correlations().is_empty());
    }

    #[test]
    fn test_target_leaving_left_to_reaper() {
        let config = BrokerConfig {
            fail_on_leave: false,
            ..BrokerConfig::default()
        };
        let mut core = BrokerCore::new(&config);
        let now = Instant::now();
        core.handle(&addr("A"), build::hi(), now);
        core.handle(&addr("X"), build::hi(), now);
        core.handle(&addr("A"), get_request(7, "X", "P"), now);

        assert!(core.handle(&addr("X"), build::bye(), now).is_empty());
        assert_eq!(core.correlations().len(), 1);
        assert_eq!(core.reap(now + Duration::from_secs(6)).len(), 1);
    }

    #[test]
    fn test_link_loss_allows_rejoin() {
        let mut core = core_with(&["A"]);
        core.link_lost(&addr("A"));
        assert!(!core.membership().contains(&addr("A")));
        assert_eq!(
            core.handle(&addr("A"), build::hi(), Instant::now()),
            vec![Outbound::reply(addr("A"), build::ok())]
        );
    }

    #[test]
    fn test_forward_failed() {
        let mut core = core_with(&["A", "X"]);
        core.handle(&addr("A"), get_request(7, "X", "P"), Instant::now());
        assert_eq!(
            core.forward_failed(id(7)),
            vec![Outbound::reply(
                addr("A"),
                build::error(id(7), reason::DEVICE_NOT_CONNECTED)
            )]
        );
        assert!(core.correlations().is_empty());
        assert!(core.forward_failed(id(7)).is_empty());
    }
}
