//! In-flight requests, keyed by the requester's request ID.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use switchboard_types::protocol::display_frames;
use switchboard_types::{Frames, PeerAddr, RequestId};

/// One forwarded request awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub requester: PeerAddr,
    pub target: PeerAddr,
    pub created_at: Instant,
    /// `[target, verb, args..]` as received from the requester.
    pub payload: Frames,
}

impl CorrelationEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// At most one live entry per request ID.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStore {
    entries: HashMap<RequestId, CorrelationEntry>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Returns `false`, leaving the store untouched, when
    /// the ID is already live.
    pub fn insert(&mut self, id: RequestId, entry: CorrelationEntry) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, entry);
        true
    }

    pub fn get(&self, id: &RequestId) -> Option<&CorrelationEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &RequestId) -> Option<CorrelationEntry> {
        self.entries.remove(id)
    }

    /// Evict every entry strictly older than `max_age`.
    pub fn sweep_stale(
        &mut self,
        now: Instant,
        max_age: Duration,
    ) -> Vec<(RequestId, CorrelationEntry)> {
        self.drain_where(|entry| entry.age(now) > max_age)
    }

    /// Evict every entry whose target is `target`.
    pub fn remove_target(&mut self, target: &PeerAddr) -> Vec<(RequestId, CorrelationEntry)> {
        self.drain_where(|entry| &entry.target == target)
    }

    fn drain_where(
        &mut self,
        pred: impl Fn(&CorrelationEntry) -> bool,
    ) -> Vec<(RequestId, CorrelationEntry)> {
        let ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(id, _)| *id)
            .collect();
        let mut evicted: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect();
        evicted.sort_by_key(|(_, entry)| entry.created_at);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for CorrelationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = Instant::now();
        let mut rows: Vec<_> = self.entries.iter().collect();
        rows.sort_by_key(|(_, entry)| entry.created_at);

        writeln!(
            f,
            "{:<12} {:<12} {:<12} {:>8}  PAYLOAD",
            "ID", "REQUESTER", "TARGET", "AGE"
        )?;
        for (id, entry) in rows {
            writeln!(
                f,
                "{:<12} {:<12} {:<12} {:>6}ms  {}",
                id.to_string(),
                entry.requester.to_string(),
                entry.target.to_string(),
                entry.age(now).as_millis(),
                display_frames(&entry.payload)
            )?;
        }
        Ok(())
    }
}
