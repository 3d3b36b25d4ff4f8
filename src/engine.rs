//! Ricart-Agrawala mutual-exclusion engine.
//!
//! The engine is a plain state machine: it owns the clock, the phase and the
//! deferred replies, and turns every input into the list of messages that
//! must be sent. It performs no I/O, so the node's event loop is the only
//! thing that ever touches it.
//!
//! # Invariants
//!
//! 1. Every outgoing message is stamped by `tick()` or `observe()`, never by
//!    reading the clock.
//! 2. A request is deferred while in the critical section, or while our own
//!    pending request precedes it in `(timestamp, identity)` order.
//! 3. Deferred replies are only sent by `release_access`, which drains them.
//! 4. A rejected event leaves the engine exactly as it was. This covers
//!    peer timestamps too large for the clock to absorb.

use crate::clock::{LamportClock, Timestamp};
use crate::error::ProtocolViolation;
use crate::message::{Message, NodeId, Request};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Requesting,
    InCriticalSection,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Requesting => "requesting",
            Phase::InCriticalSection => "in the critical section",
        })
    }
}

/// A message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: NodeId,
    pub message: Message,
}

/// What a remote message did to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    /// The last missing reply arrived and the node entered the section.
    pub entered: bool,
    /// A request was withheld until release.
    pub deferred: bool,
}

#[derive(Debug, Clone)]
pub struct Engine {
    id: NodeId,
    peers: Vec<NodeId>,
    clock: LamportClock,
    phase: Phase,
    /// 0 when no request is outstanding.
    outstanding: Timestamp,
    reply_count: usize,
    deferred: Vec<Request>,
}

impl Engine {
    pub fn new(id: NodeId, peers: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            id,
            peers: peers.into_iter().collect(),
            clock: LamportClock::new(),
            phase: Phase::Idle,
            outstanding: 0,
            reply_count: 0,
            deferred: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_critical_section(&self) -> bool {
        self.phase == Phase::InCriticalSection
    }

    pub fn clock(&self) -> Timestamp {
        self.clock.current()
    }

    pub fn outstanding_timestamp(&self) -> Timestamp {
        self.outstanding
    }

    pub fn reply_count(&self) -> usize {
        self.reply_count
    }

    pub fn deferred(&self) -> &[Request] {
        &self.deferred
    }

    fn broadcast(&self, message: Message) -> Vec<Outbound> {
        self.peers
            .iter()
            .map(|to| Outbound {
                to: to.clone(),
                message: message.clone(),
            })
            .collect()
    }

    /// Starts a new round. Only valid while idle.
    ///
    /// Returns the request timestamp and the requests to broadcast. With no
    /// peers there is nobody to wait for, so the node enters immediately.
    pub fn request_access(&mut self) -> Result<(Timestamp, Vec<Outbound>), ProtocolViolation> {
        if self.phase != Phase::Idle {
            return Err(ProtocolViolation::NotIdle(self.phase));
        }

        let timestamp = self.clock.tick();
        self.outstanding = timestamp;
        self.reply_count = 0;
        self.phase = Phase::Requesting;
        info!(timestamp, peers = self.peers.len(), "requesting access");

        let outbound = self.broadcast(Message::Request {
            from: self.id.clone(),
            timestamp,
        });
        self.try_enter();
        Ok((timestamp, outbound))
    }

    /// Leaves the critical section and answers everybody we held back.
    pub fn release_access(&mut self) -> Result<(Timestamp, Vec<Outbound>), ProtocolViolation> {
        if self.phase != Phase::InCriticalSection {
            return Err(ProtocolViolation::NotInCriticalSection(self.phase));
        }

        let timestamp = self.clock.tick();
        let mut outbound = self.broadcast(Message::Release {
            from: self.id.clone(),
            timestamp,
        });

        for request in std::mem::take(&mut self.deferred) {
            let timestamp = self.clock.tick();
            debug!(to = %request.requester, timestamp, "sending deferred reply");
            outbound.push(Outbound {
                to: request.requester,
                message: Message::Reply {
                    from: self.id.clone(),
                    timestamp,
                },
            });
        }

        self.outstanding = 0;
        self.reply_count = 0;
        self.phase = Phase::Idle;
        info!(timestamp, "released access");
        Ok((timestamp, outbound))
    }

    /// Applies a message received from a peer.
    pub fn on_message(&mut self, message: Message) -> Result<Effects, ProtocolViolation> {
        if let Message::Reply { from, .. } = &message {
            if self.outstanding == 0 {
                return Err(ProtocolViolation::UnsolicitedReply(from.clone()));
            }
        }

        let now = self
            .clock
            .observe(message.timestamp())
            .ok_or_else(|| ProtocolViolation::TimestampOverflow {
                from: message.sender().clone(),
                timestamp: message.timestamp(),
            })?;

        match message {
            Message::Request { from, timestamp } => {
                Ok(self.on_request(Request::new(from, timestamp)))
            }
            Message::Reply { from, timestamp } => Ok(self.on_reply(from, timestamp)),
            Message::Release { from, timestamp } => {
                debug!(%from, timestamp, clock = now, "peer released");
                Ok(Effects::default())
            }
        }
    }

    fn should_defer(&self, request: &Request) -> bool {
        if self.phase == Phase::InCriticalSection {
            return true;
        }
        if self.outstanding == 0 {
            return false;
        }
        let own = Request::new(self.id.clone(), self.outstanding);
        own.precedes(request)
    }

    /// Called after the request's timestamp was observed.
    fn on_request(&mut self, request: Request) -> Effects {
        if self.should_defer(&request) {
            debug!(from = %request.requester, timestamp = request.timestamp, "deferring request");
            self.deferred.push(request);
            return Effects {
                deferred: true,
                ..Effects::default()
            };
        }

        let timestamp = self.clock.tick();
        debug!(to = %request.requester, timestamp, "replying");
        Effects {
            outbound: vec![Outbound {
                to: request.requester,
                message: Message::Reply {
                    from: self.id.clone(),
                    timestamp,
                },
            }],
            ..Effects::default()
        }
    }

    fn on_reply(&mut self, from: NodeId, timestamp: Timestamp) -> Effects {
        // No per-peer dedup: the transport delivers each reply exactly once.
        self.reply_count += 1;
        debug!(%from, timestamp, replies = self.reply_count, needed = self.peers.len(), "reply");

        Effects {
            entered: self.try_enter(),
            ..Effects::default()
        }
    }

    fn try_enter(&mut self) -> bool {
        if self.phase == Phase::Requesting && self.reply_count >= self.peers.len() {
            self.phase = Phase::InCriticalSection;
            info!(timestamp = self.outstanding, "entered critical section");
            true
        } else {
            false
        }
    }
}
