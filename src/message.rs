//! Module that contains all the message types exchanged between nodes.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node.
///
/// Ordered lexicographically. The ordering is only ever used to break ties
/// between requests carrying the same timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Struct that represents a timestamped request for the critical section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub requester: NodeId,
    pub timestamp: Timestamp,
}

/// Struct that represents the permission one node grants to a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub replier: NodeId,
    pub timestamp: Timestamp,
}

/// Struct that represents the notice a node sends when leaving the critical section.
///
/// Carries no obligation for the receiver, it only synchronizes clocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub sender: NodeId,
    pub timestamp: Timestamp,
}

impl Request {
    pub fn new(requester: NodeId, timestamp: Timestamp) -> Self {
        Self {
            requester,
            timestamp,
        }
    }

    /// Total-order key: lower timestamp first, then lower identity.
    pub fn priority(&self) -> (Timestamp, &NodeId) {
        (self.timestamp, &self.requester)
    }

    /// Function that tells if this request wins against `other`.
    pub fn precedes(&self, other: &Request) -> bool {
        self.priority() < other.priority()
    }
}

/// Enum that represents every message a node can receive from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Request {
        from: NodeId,
        timestamp: Timestamp,
    },
    Reply {
        from: NodeId,
        timestamp: Timestamp,
    },
    Release {
        from: NodeId,
        timestamp: Timestamp,
    },
}

impl Message {
    pub fn sender(&self) -> &NodeId {
        match self {
            Self::Request { from, .. } | Self::Reply { from, .. } | Self::Release { from, .. } => {
                from
            }
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Request { timestamp, .. }
            | Self::Reply { timestamp, .. }
            | Self::Release { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::Release { .. } => "release",
        }
    }

    /// Function that returns the message as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Function that parses the message from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(line)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request {
            from: request.requester,
            timestamp: request.timestamp,
        }
    }
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        Self::Reply {
            from: reply.replier,
            timestamp: reply.timestamp,
        }
    }
}

impl From<Release> for Message {
    fn from(release: Release) -> Self {
        Self::Release {
            from: release.sender,
            timestamp: release.timestamp,
        }
    }
}

/// Answer written back for every message line, once the message is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "confirm", rename_all = "snake_case")]
pub enum Confirm {
    Ack,
    Rejected { reason: String },
}

impl Confirm {
    /// Function that returns the confirmation as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Function that parses the confirmation from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_order_lexicographically() {
        assert!(NodeId::from("A") < NodeId::from("B"));
        assert!(NodeId::from("node-10") < NodeId::from("node-9"));
    }

    #[test]
    fn lower_timestamp_precedes_regardless_of_identity() {
        let late = Request::new("A".into(), 4);
        let early = Request::new("Z".into(), 3);
        assert!(early.precedes(&late));
        assert!(!late.precedes(&early));
    }

    #[test]
    fn equal_timestamps_break_ties_by_identity() {
        let a = Request::new("A".into(), 1);
        let b = Request::new("B".into(), 1);
        assert!(a.precedes(&b));
        assert!(!b.precedes(&a));
        assert!(!a.precedes(&a));
    }

    #[test]
    fn wire_format_is_tagged_json() {
        let msg = Message::Reply {
            from: "B".into(),
            timestamp: 5,
        };
        let line = msg.to_json_string().unwrap();
        assert_eq!(line, r#"{"kind":"reply","from":"B","timestamp":5}"#);
        assert_eq!(Message::from_json_string(&line).unwrap(), msg);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Message::from_json_string(r#"{"kind":"grant","from":"B"}"#).is_err());
        assert!(Confirm::from_json_string("ack").is_err());
        assert_eq!(
            Confirm::from_json_string(r#"{"confirm":"ack"}"#).unwrap(),
            Confirm::Ack
        );
    }
}
