//! Membership registry: which devices have joined.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use switchboard_types::PeerAddr;

/// A joined device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub addr: PeerAddr,
    /// When the join was accepted.
    pub joined_at: DateTime<Utc>,
}

/// Set of joined devices, ordered by address.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    members: BTreeMap<PeerAddr, MemberEntry>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `addr`. Returns `false`, leaving the existing entry as it is,
    /// when `addr` is already a member.
    pub fn join(&mut self, addr: PeerAddr) -> bool {
        if self.members.contains_key(&addr) {
            return false;
        }
        let entry = MemberEntry {
            addr: addr.clone(),
            joined_at: Utc::now(),
        };
        self.members.insert(addr, entry);
        true
    }

    /// Remove `addr`, returning its entry if it was a member.
    pub fn leave(&mut self, addr: &PeerAddr) -> Option<MemberEntry> {
        self.members.remove(addr)
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.members.contains_key(addr)
    }

    pub fn get(&self, addr: &PeerAddr) -> Option<&MemberEntry> {
        self.members.get(addr)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member addresses in order.
    pub fn addrs(&self) -> Vec<PeerAddr> {
        self.members.keys().cloned().collect()
    }
}
