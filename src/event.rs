//! Per-node inbox that serializes every input to the engine.
//!
//! Remote messages and local calls alike become an [`Event`] on one bounded
//! queue with exactly one consumer, the node's event loop. Producers that can
//! wait use [`Inbox::post`] and are held back while the queue is full; nothing
//! is ever dropped.

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::message::{Message, Release, Reply, Request};
use tokio::sync::{mpsc, oneshot};

/// Queue slots reserved per peer (plus one set for local calls).
pub const QUEUE_SLOTS_PER_PEER: usize = 4;

/// Queue capacity for a node with `peers` peers.
pub fn capacity_for(peers: usize) -> usize {
    (peers + 1) * QUEUE_SLOTS_PER_PEER
}

/// Answer to a local call: the timestamp the engine stamped it with.
pub type Responder = oneshot::Sender<Result<Timestamp>>;

#[derive(Debug)]
pub enum Event {
    Request(Request),
    Reply(Reply),
    Release(Release),
    LocalRequestAccess(Responder),
    LocalReleaseAccess(Responder),
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        match message {
            Message::Request { from, timestamp } => Event::Request(Request::new(from, timestamp)),
            Message::Reply { from, timestamp } => Event::Reply(Reply {
                replier: from,
                timestamp,
            }),
            Message::Release { from, timestamp } => Event::Release(Release {
                sender: from,
                timestamp,
            }),
        }
    }
}

/// Producer half of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Event>,
    capacity: usize,
}

/// Consumer half of the queue. Owned by the event loop.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::Receiver<Event>,
}

/// Creates a queue holding at most `capacity` events.
pub fn bounded(capacity: usize) -> (Inbox, EventQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (Inbox { tx, capacity }, EventQueue { rx })
}

impl Inbox {
    /// Enqueues `event`, waiting for space while the queue is full.
    pub async fn post(&self, event: impl Into<Event>) -> Result<()> {
        self.tx
            .send(event.into())
            .await
            .map_err(|_| Error::NodeStopped)
    }

    /// Enqueues `event` without waiting.
    pub fn try_post(&self, event: impl Into<Event>) -> Result<()> {
        use mpsc::error::TrySendError;

        self.tx.try_send(event.into()).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueOverflow {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => Error::NodeStopped,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventQueue {
    /// Next event, or `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stops accepting events. Already queued ones can still be taken.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
