//! Outbound requests and the queue that tracks them until they resolve.

use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use switchboard_types::error::CodecError;
use switchboard_types::protocol::build;
use switchboard_types::{Frames, PeerAddr, RequestId, ValueCodec, Verb};

/// What a request asks of its target.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read a parameter.
    Get { param: String },
    /// Overwrite a parameter.
    Set { param: String, value: Value },
}

/// A GET or SET addressed to another device.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub target: PeerAddr,
    pub op: Operation,
}

impl Request {
    pub fn get(target: impl Into<PeerAddr>, param: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            op: Operation::Get {
                param: param.into(),
            },
        }
    }

    pub fn set(
        target: impl Into<PeerAddr>,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            target: target.into(),
            op: Operation::Set {
                param: param.into(),
                value: value.into(),
            },
        }
    }

    pub fn verb(&self) -> Verb {
        match self.op {
            Operation::Get { .. } => Verb::Get,
            Operation::Set { .. } => Verb::Set,
        }
    }

    pub fn param(&self) -> &str {
        match &self.op {
            Operation::Get { param } | Operation::Set { param, .. } => param,
        }
    }

    /// `[id, target, verb, param, (value)]`
    pub(crate) fn to_frames(&self, id: RequestId, codec: ValueCodec) -> Result<Frames, CodecError> {
        let param = Bytes::copy_from_slice(self.param().as_bytes());
        let args = match &self.op {
            Operation::Get { .. } => vec![param],
            Operation::Set { value, .. } => vec![param, codec.encode(value)?],
        };
        Ok(build::request(id, &self.target, self.verb(), args))
    }
}

/// A request queued on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: RequestId,
    pub request: Request,
    /// Allowed time between transmission and resolution.
    pub timeout: Duration,
    /// When the command went out, `None` while still queued.
    pub sent_at: Option<Instant>,
    /// The broker accepted the command for forwarding.
    pub acked: bool,
}

impl Command {
    pub fn new(id: RequestId, request: Request, timeout: Duration) -> Self {
        Self {
            id,
            request,
            timeout,
            sent_at: None,
            acked: false,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// A command only ages once it has been transmitted.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.sent_at
            .is_some_and(|sent| now.saturating_duration_since(sent) > self.timeout)
    }
}

/// Commands keyed by request ID, kept in insertion order.
///
/// `insert`, `remove` and `sweep_expired` are the only public mutators; the
/// device loop stamps transmission and acknowledgment itself.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Returns `false` and leaves the queue untouched if a
    /// command with the same ID is already live.
    pub fn insert(&mut self, command: Command) -> bool {
        if self.contains(&command.id) {
            return false;
        }
        self.commands.push(command);
        true
    }

    pub fn remove(&mut self, id: &RequestId) -> Option<Command> {
        let index = self.commands.iter().position(|c| &c.id == id)?;
        Some(self.commands.remove(index))
    }

    /// Evict every sent command older than its timeout and return them.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<Command> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.commands)
            .into_iter()
            .partition(|c| c.is_expired(now));
        self.commands = live;
        expired
    }

    pub fn get(&self, id: &RequestId) -> Option<&Command> {
        self.commands.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// IDs of commands not yet transmitted, oldest first.
    pub fn unsent(&self) -> Vec<RequestId> {
        self.commands
            .iter()
            .filter(|c| !c.is_sent())
            .map(|c| c.id)
            .collect()
    }

    pub(crate) fn mark_sent(&mut self, id: &RequestId, now: Instant) {
        if let Some(command) = self.commands.iter_mut().find(|c| &c.id == id) {
            command.sent_at = Some(now);
        }
    }

    pub(crate) fn acknowledge(&mut self, id: &RequestId) -> bool {
        match self.commands.iter_mut().find(|c| &c.id == id) {
            Some(command) => {
                command.acked = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.commands.clear();
    }
}

impl fmt::Display for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:<12} {:<4} {:<12} {:<8} {:>8}",
            "ID", "TARGET", "VERB", "PARAM", "STATE", "TIMEOUT"
        )?;
        for c in &self.commands {
            let state = match (c.is_sent(), c.acked) {
                (false, _) => "queued",
                (true, false) => "sent",
                (true, true) => "acked",
            };
            writeln!(
                f,
                "{:<12} {:<12} {:<4} {:<12} {:<8} {:>6}ms",
                c.id.to_string(),
                c.request.target.to_string(),
                c.request.verb().as_str(),
                c.request.param(),
                state,
                c.timeout.as_millis()
            )?;
        }
        Ok(())
    }
}

/// Hands out request IDs that never collide with a live command.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    /// Start from a random point so IDs differ across restarts.
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// The next ID not held by any command in `queue`.
    pub fn next_id(&mut self, queue: &CommandQueue) -> RequestId {
        loop {
            let id = RequestId::from(self.next);
            self.next = self.next.wrapping_add(1);
            if !queue.contains(&id) {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
