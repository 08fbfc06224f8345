//! The device actor: connection state machine and dispatch loop.
//!
//! Each [`Device::tick`] does one bounded unit of work for the current
//! state:
//!
//! - `disconnected`: send `HI`
//! - `joining`: wait for `OK`/`ERR`, resetting the link once the join
//!   timeout passes
//! - `joined`: handle at most one inbound message, transmit queued commands
//! - `leaving`: send `BYE`
//! - `draining`: discard the queue and release the link
//!
//! Expired commands are swept at the end of every tick while the device is
//! connecting or joined.

use crate::command::{Command, CommandQueue, IdGenerator, Operation, Request};
use crate::error::{DeviceError, DeviceResult};
use crate::mailbox::Mailbox;
use crate::params::{ParamStore, Params};
use crate::state::{ConnectionState, LoopStatus};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_types::config::DeviceConfig;
use switchboard_types::protocol::{build, display_frames, reason, JoinReply, Tagged};
use switchboard_types::{Frames, PeerAddr, RequestId, Verb};
use switchboard_wire::{Connector, WireError};
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// How one of the owner's requests ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `RET`: the target's current value.
    Value {
        id: RequestId,
        target: PeerAddr,
        param: String,
        value: Value,
    },
    /// `MET`: the target applied the SET.
    Confirmed {
        id: RequestId,
        target: PeerAddr,
        param: String,
    },
    /// `ERR` from the broker or the target, or a reply that could not be read.
    Failed {
        id: RequestId,
        target: PeerAddr,
        reason: String,
    },
    /// Nothing came back within the command's timeout.
    TimedOut { id: RequestId, target: PeerAddr },
}

impl Outcome {
    pub fn id(&self) -> RequestId {
        match self {
            Outcome::Value { id, .. }
            | Outcome::Confirmed { id, .. }
            | Outcome::Failed { id, .. }
            | Outcome::TimedOut { id, .. } => *id,
        }
    }
}

/// A named peer of the broker.
pub struct Device<P: ParamStore = Params> {
    name: PeerAddr,
    params: P,
    config: DeviceConfig,
    mailbox: Mailbox,
    state: ConnectionState,
    queue: CommandQueue,
    ids: IdGenerator,
    outcomes: Vec<Outcome>,
    join_deadline: Option<Instant>,
    span: Span,
}

impl<P: ParamStore> Device<P> {
    /// Create a closed device. Nothing is dialed until [`Device::start`].
    pub fn new(
        name: impl Into<PeerAddr>,
        params: P,
        connector: impl Connector,
        config: DeviceConfig,
    ) -> Self {
        let name = name.into();
        let span = info_span!("device", name = %name);
        Self {
            mailbox: Mailbox::new(name.clone(), Arc::new(connector)),
            name,
            params,
            config,
            state: ConnectionState::Closed,
            queue: CommandQueue::new(),
            ids: IdGenerator::new(),
            outcomes: Vec::new(),
            join_deadline: None,
            span,
        }
    }

    pub fn name(&self) -> &PeerAddr {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the broker has answered the join, and we have not left since.
    pub fn broker_alive(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Joined | ConnectionState::Rejected | ConnectionState::Leaving
        )
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    /// Drain the outcomes recorded since the last call.
    pub fn take_outcomes(&mut self) -> Vec<Outcome> {
        std::mem::take(&mut self.outcomes)
    }

    /// Open the transport endpoint and clear the queue.
    ///
    /// Failing to reach the broker here is returned to the caller; later
    /// link failures are handled by resetting and joining again.
    pub async fn start(&mut self) -> DeviceResult<()> {
        if self.state != ConnectionState::Closed {
            return Err(DeviceError::InvalidState {
                current: self.state,
                operation: "start",
            });
        }
        let span = self.span.clone();
        async {
            self.mailbox.open().await?;
            self.queue.clear();
            self.transition(ConnectionState::Disconnected);
            Ok::<(), DeviceError>(())
        }
        .instrument(span)
        .await
    }

    /// Queue a request with its own timeout. The timeout starts counting
    /// when the command is transmitted. A SET value that the configured
    /// codec cannot encode is refused here.
    pub fn send(&mut self, request: Request, timeout: Duration) -> DeviceResult<RequestId> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Joining | ConnectionState::Joined => {}
            current => {
                return Err(DeviceError::InvalidState {
                    current,
                    operation: "send",
                })
            }
        }
        if let Operation::Set { value, .. } = &request.op {
            self.config.value_codec.encode(value)?;
        }
        let id = self.ids.next_id(&self.queue);
        debug!(
            parent: &self.span,
            id = %id,
            target = %request.target,
            verb = request.verb().as_str(),
            param = request.param(),
            "command queued"
        );
        self.queue.insert(Command::new(id, request, timeout));
        Ok(id)
    }

    /// Queue a request with the configured default timeout.
    pub fn request(&mut self, request: Request) -> DeviceResult<RequestId> {
        let timeout = self.config.command_timeout();
        self.send(request, timeout)
    }

    /// Run one step of the loop.
    pub async fn tick(&mut self) -> LoopStatus {
        let span = self.span.clone();
        self.step().instrument(span).await;
        LoopStatus::from_state(self.state)
    }

    /// Leave the broker and release the endpoint. Returns once the device is
    /// closed.
    pub async fn exit(&mut self) {
        let next = match self.state {
            ConnectionState::Closed => return,
            ConnectionState::Joined | ConnectionState::Joining | ConnectionState::Leaving => {
                ConnectionState::Leaving
            }
            ConnectionState::Disconnected
            | ConnectionState::Rejected
            | ConnectionState::Draining => ConnectionState::Draining,
        };
        {
            let span = self.span.clone();
            let _enter = span.enter();
            info!(from = %self.state, "exit requested");
            self.transition(next);
        }
        while self.tick().await != LoopStatus::Closed {}
    }

    async fn step(&mut self) {
        match self.state {
            ConnectionState::Closed | ConnectionState::Rejected => return,
            ConnectionState::Disconnected => self.send_join().await,
            ConnectionState::Joining => self.await_join().await,
            ConnectionState::Joined => self.serve().await,
            ConnectionState::Leaving => self.leave().await,
            ConnectionState::Draining => self.drain(),
        }
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Joining | ConnectionState::Joined
        ) {
            self.expire(Instant::now());
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    // -- connection lifecycle ------------------------------------------------

    async fn send_join(&mut self) {
        if !self.mailbox.is_open() {
            if let Err(e) = self.mailbox.open().await {
                warn!(error = %e, "broker unreachable");
                tokio::time::sleep(self.config.poll_interval()).await;
                return;
            }
        }
        match self.mailbox.send(build::hi()).await {
            Ok(()) => {
                info!("joining");
                self.join_deadline = Some(Instant::now() + self.config.join_timeout());
                self.transition(ConnectionState::Joining);
            }
            Err(e) => {
                warn!(error = %e, "failed to send join");
                self.mailbox.close();
            }
        }
    }

    async fn await_join(&mut self) {
        let now = Instant::now();
        let deadline = self.join_deadline.unwrap_or(now);
        let wait = deadline
            .saturating_duration_since(now)
            .min(self.config.poll_interval());

        match self.mailbox.recv_timeout(wait).await {
            Ok(Some(frames)) => match JoinReply::parse(frames) {
                JoinReply::Accepted => {
                    info!("joined");
                    self.join_deadline = None;
                    self.transition(ConnectionState::Joined);
                }
                JoinReply::Refused(reason) => {
                    warn!(reason = %reason, "join refused");
                    self.join_deadline = None;
                    self.transition(ConnectionState::Rejected);
                }
                JoinReply::Other(frames) => {
                    warn!(frames = %display_frames(&frames), "unexpected message while joining");
                }
            },
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(
                        timeout_ms = self.config.join_timeout_ms,
                        "no answer to join, resetting connection"
                    );
                    self.reset_connection().await;
                }
            }
            Err(e) => {
                warn!(error = %e, "link lost while joining");
                self.reset_connection().await;
            }
        }
    }

    async fn reset_connection(&mut self) {
        self.join_deadline = None;
        if let Err(e) = self.mailbox.reset().await {
            warn!(error = %e, "reconnect failed");
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn leave(&mut self) {
        match self.mailbox.send(build::bye()).await {
            Ok(()) => info!("leaving"),
            Err(e) => debug!(error = %e, "could not send leave"),
        }
        self.transition(ConnectionState::Draining);
    }

    fn drain(&mut self) {
        if !self.queue.is_empty() {
            info!(discarded = self.queue.len(), "discarding queued commands");
        }
        self.queue.clear();
        self.mailbox.close();
        self.join_deadline = None;
        self.transition(ConnectionState::Closed);
    }

    // -- joined --------------------------------------------------------------

    async fn serve(&mut self) {
        let inbound = match self.mailbox.recv_timeout(self.config.poll_interval()).await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "lost connection to broker");
                self.reset_connection().await;
                return;
            }
        };
        if let Some(frames) = inbound {
            if let Err(e) = self.dispatch(frames).await {
                warn!(error = %e, "lost connection to broker");
                self.reset_connection().await;
                return;
            }
        }
        self.flush().await;
    }

    async fn dispatch(&mut self, frames: Frames) -> Result<(), WireError> {
        debug!(frames = %display_frames(&frames), "inbound");
        let msg = match Tagged::parse(frames) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                return Ok(());
            }
        };
        match msg.verb {
            Some(Verb::Ack) => {
                if self.queue.acknowledge(&msg.id) {
                    debug!(id = %msg.id, "request accepted by broker");
                } else {
                    warn!(id = %msg.id, "acknowledgment for unknown request");
                }
            }
            Some(Verb::Ret) => self.resolve_value(&msg),
            Some(Verb::Met) => self.resolve_confirmation(&msg),
            Some(Verb::Err) => self.resolve_failure(&msg),
            Some(Verb::Get) => return self.serve_get(&msg).await,
            Some(Verb::Set) => return self.serve_set(&msg).await,
            _ => warn!(id = %msg.id, verb = %msg.verb_lossy(), "unexpected command"),
        }
        Ok(())
    }

    fn resolve_value(&mut self, msg: &Tagged) {
        let Some(command) = self.queue.remove(&msg.id) else {
            warn!(id = %msg.id, "value for unknown request");
            return;
        };
        let target = command.request.target;
        let decoded = msg
            .arg_str(0, "param")
            .map_err(|e| e.to_string())
            .and_then(|param| {
                let blob = msg.arg(1, "value").map_err(|e| e.to_string())?;
                let value = self
                    .config
                    .value_codec
                    .decode(blob)
                    .map_err(|e| e.to_string())?;
                Ok((param.to_string(), value))
            });
        match decoded {
            Ok((param, value)) => {
                info!(id = %msg.id, target = %target, param = %param, value = %value, "received value");
                self.outcomes.push(Outcome::Value {
                    id: msg.id,
                    target,
                    param,
                    value,
                });
            }
            Err(reason) => {
                warn!(id = %msg.id, target = %target, reason = %reason, "unreadable value");
                self.outcomes.push(Outcome::Failed {
                    id: msg.id,
                    target,
                    reason,
                });
            }
        }
    }

    fn resolve_confirmation(&mut self, msg: &Tagged) {
        let Some(command) = self.queue.remove(&msg.id) else {
            warn!(id = %msg.id, "confirmation for unknown request");
            return;
        };
        let param = msg
            .arg_str(0, "param")
            .map(str::to_string)
            .unwrap_or_else(|_| command.request.param().to_string());
        info!(id = %msg.id, target = %command.request.target, param = %param, "set confirmed");
        self.outcomes.push(Outcome::Confirmed {
            id: msg.id,
            target: command.request.target,
            param,
        });
    }

    fn resolve_failure(&mut self, msg: &Tagged) {
        let reason = msg
            .args
            .first()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .unwrap_or_default();
        match self.queue.remove(&msg.id) {
            Some(command) => {
                warn!(id = %msg.id, target = %command.request.target, reason = %reason, "request failed");
                self.outcomes.push(Outcome::Failed {
                    id: msg.id,
                    target: command.request.target,
                    reason,
                });
            }
            None => warn!(id = %msg.id, reason = %reason, "error for unknown request"),
        }
    }

    async fn serve_get(&mut self, msg: &Tagged) -> Result<(), WireError> {
        let reply = match msg.arg_str(0, "param") {
            Err(e) => build::error(msg.id, &e.to_string()),
            Ok(param) => match self.params.get(param) {
                None => {
                    warn!(id = %msg.id, param, "get for unknown parameter");
                    build::error(msg.id, &reason::not_param(param))
                }
                Some(value) => match self.config.value_codec.encode(&value) {
                    Ok(blob) => {
                        debug!(id = %msg.id, param, value = %value, "serving get");
                        build::tagged(
                            msg.id,
                            Verb::Ret,
                            [Bytes::copy_from_slice(param.as_bytes()), blob],
                        )
                    }
                    Err(e) => build::error(msg.id, &e.to_string()),
                },
            },
        };
        self.mailbox.send(reply).await
    }

    async fn serve_set(&mut self, msg: &Tagged) -> Result<(), WireError> {
        let reply = match (msg.arg_str(0, "param"), msg.arg(1, "value")) {
            (Err(e), _) | (_, Err(e)) => build::error(msg.id, &e.to_string()),
            (Ok(param), Ok(blob)) => match self.config.value_codec.decode(blob) {
                Err(e) => build::error(msg.id, &e.to_string()),
                Ok(value) => {
                    if self.params.set(param, value) {
                        info!(id = %msg.id, param, "parameter set");
                        build::tagged(
                            msg.id,
                            Verb::Met,
                            [Bytes::copy_from_slice(param.as_bytes()), blob.clone()],
                        )
                    } else {
                        warn!(id = %msg.id, param, "set for unknown parameter");
                        build::error(msg.id, &reason::not_param(param))
                    }
                }
            },
        };
        self.mailbox.send(reply).await
    }

    async fn flush(&mut self) {
        for id in self.queue.unsent() {
            let Some(command) = self.queue.get(&id) else {
                continue;
            };
            let target = command.request.target.clone();
            let frames = match command.request.to_frames(id, self.config.value_codec) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(id = %id, target = %target, error = %e, "cannot encode request");
                    self.queue.remove(&id);
                    self.outcomes.push(Outcome::Failed {
                        id,
                        target,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Err(e) = self.mailbox.send(frames).await {
                warn!(error = %e, "lost connection to broker");
                self.reset_connection().await;
                return;
            }
            debug!(id = %id, target = %target, "command sent");
            self.queue.mark_sent(&id, Instant::now());
        }
    }

    fn expire(&mut self, now: Instant) {
        for command in self.queue.sweep_expired(now) {
            warn!(
                id = %command.id,
                target = %command.request.target,
                timeout_ms = command.timeout.as_millis() as u64,
                "request timed out"
            );
            self.outcomes.push(Outcome::TimedOut {
                id: command.id,
                target: command.request.target,
            });
        }
    }
}
