//! Error kinds raised by a node.

use crate::{clock::Timestamp, engine::Phase, message::NodeId};
use std::io;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Startup misconfiguration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node identity must not be empty")]
    EmptyIdentity,

    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: &'static str },

    #[error("peer `{0}` was added twice")]
    DuplicatePeer(NodeId),

    #[error("peer `{0}` has the node's own identity")]
    SelfPeer(NodeId),
}

/// A message could not be handed to a peer.
///
/// Non-fatal: the current round simply never collects that peer's reply.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("peer `{0}` is not in the directory")]
    UnknownPeer(NodeId),

    #[error("could not connect to `{peer}` after {attempts} attempt(s): {source}")]
    Connect {
        peer: NodeId,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("connection to `{peer}` failed: {source}")]
    Codec {
        peer: NodeId,
        #[source]
        source: LinesCodecError,
    },

    #[error("could not encode message for `{peer}`: {source}")]
    Encode {
        peer: NodeId,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{0}` closed the connection before confirming")]
    ConnectionClosed(NodeId),

    #[error("`{peer}` rejected the message: {reason}")]
    Rejected { peer: NodeId, reason: String },

    #[error("`{0}` is unreachable")]
    Unreachable(NodeId),
}

/// An event that is not valid in the node's current phase.
///
/// Rejected without touching engine state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("access requested while {0}")]
    NotIdle(Phase),

    #[error("release requested while {0}")]
    NotInCriticalSection(Phase),

    #[error("reply from `{0}` with no outstanding request")]
    UnsolicitedReply(NodeId),

    #[error("timestamp {timestamp} from `{from}` is out of range")]
    TimestampOverflow { from: NodeId, timestamp: Timestamp },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("event queue is full (capacity {capacity})")]
    QueueOverflow { capacity: usize },

    #[error("node has stopped")]
    NodeStopped,

    #[error("could not listen on `{address}`: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("could not set up logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
