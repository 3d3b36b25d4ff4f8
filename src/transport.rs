//! Point-to-point delivery of protocol messages.
//!
//! A successful [`Transport::send`] means the message has been enqueued in
//! the peer's inbox. A failed send is reported and never re-sent: once a
//! message may have reached the peer, sending it again could make the peer
//! count the same reply twice.

use crate::config::ConnectPolicy;
use crate::directory::PeerDirectory;
use crate::error::DeliveryError;
use crate::event::Inbox;
use crate::message::{Confirm, Message, NodeId};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

/// Longest line accepted on a peer connection.
pub const MAX_LINE_LENGTH: usize = 4 * 1024;

pub type Lines = Framed<TcpStream, LinesCodec>;

pub fn lines(stream: TcpStream) -> Lines {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hands `message` to `to`'s inbox, or says why it could not.
    async fn send(&self, to: &NodeId, message: Message) -> Result<(), DeliveryError>;
}

struct PeerLink {
    address: String,
    connection: Mutex<Option<Lines>>,
}

/// Line-delimited JSON over one lazily opened TCP connection per peer.
///
/// Sends to the same peer are serialized on that peer's connection.
pub struct TcpTransport {
    policy: ConnectPolicy,
    links: HashMap<NodeId, PeerLink>,
}

impl TcpTransport {
    pub fn new(directory: &PeerDirectory, policy: ConnectPolicy) -> Self {
        let links = directory
            .iter()
            .map(|(id, address)| {
                let link = PeerLink {
                    address: address.to_string(),
                    connection: Mutex::new(None),
                };
                (id.clone(), link)
            })
            .collect();

        Self { policy, links }
    }

    async fn connect(&self, peer: &NodeId, address: &str) -> Result<Lines, DeliveryError> {
        let mut attempt = 1;
        loop {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!(%peer, address, attempt, "connected");
                    return Ok(lines(stream));
                }
                Err(source) if attempt >= self.policy.attempts => {
                    return Err(DeliveryError::Connect {
                        peer: peer.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    debug!(%peer, address, attempt, ?delay, "connect failed: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Writes one message line and waits for the peer's confirmation.
async fn exchange(lines: &mut Lines, peer: &NodeId, line: String) -> Result<(), DeliveryError> {
    let codec = |source| DeliveryError::Codec {
        peer: peer.clone(),
        source,
    };

    lines.send(line).await.map_err(codec)?;
    match lines.next().await {
        Some(Ok(answer)) => match Confirm::from_json_string(&answer) {
            Ok(Confirm::Ack) => Ok(()),
            Ok(Confirm::Rejected { reason }) => Err(DeliveryError::Rejected {
                peer: peer.clone(),
                reason,
            }),
            Err(e) => Err(DeliveryError::Rejected {
                peer: peer.clone(),
                reason: format!("unreadable confirmation: {e}"),
            }),
        },
        Some(Err(source)) => Err(codec(source)),
        None => Err(DeliveryError::ConnectionClosed(peer.clone())),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, to: &NodeId, message: Message) -> Result<(), DeliveryError> {
        let link = self
            .links
            .get(to)
            .ok_or_else(|| DeliveryError::UnknownPeer(to.clone()))?;
        let line = message
            .to_json_string()
            .map_err(|source| DeliveryError::Encode {
                peer: to.clone(),
                source,
            })?;

        let mut connection = link.connection.lock().await;
        let mut lines = match connection.take() {
            Some(lines) => lines,
            None => self.connect(to, &link.address).await?,
        };

        // A broken connection is dropped; the next send reconnects.
        let result = exchange(&mut lines, to, line).await;
        if result.is_ok() {
            *connection = Some(lines);
        }
        result
    }
}

#[derive(Default)]
struct LocalState {
    inboxes: HashMap<NodeId, Inbox>,
    down: HashSet<NodeId>,
}

/// In-process network that posts straight into each node's inbox.
///
/// Nodes can be cut off and brought back to inject delivery failures.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<RwLock<LocalState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: NodeId, inbox: Inbox) {
        self.state.write().await.inboxes.insert(id, inbox);
    }

    /// Messages to or from `id` fail until [`LocalNetwork::reconnect`].
    pub async fn disconnect(&self, id: &NodeId) {
        self.state.write().await.down.insert(id.clone());
    }

    pub async fn reconnect(&self, id: &NodeId) {
        self.state.write().await.down.remove(id);
    }

    pub async fn is_connected(&self, id: &NodeId) -> bool {
        !self.state.read().await.down.contains(id)
    }

    /// Transport used by the node called `own_id`.
    pub fn endpoint(&self, own_id: NodeId) -> LocalEndpoint {
        LocalEndpoint {
            own_id,
            network: self.clone(),
        }
    }
}

pub struct LocalEndpoint {
    own_id: NodeId,
    network: LocalNetwork,
}

#[async_trait]
impl Transport for LocalEndpoint {
    async fn send(&self, to: &NodeId, message: Message) -> Result<(), DeliveryError> {
        let inbox = {
            let state = self.network.state.read().await;
            if state.down.contains(to) || state.down.contains(&self.own_id) {
                return Err(DeliveryError::Unreachable(to.clone()));
            }
            state
                .inboxes
                .get(to)
                .cloned()
                .ok_or_else(|| DeliveryError::UnknownPeer(to.clone()))?
        };

        inbox
            .post(message)
            .await
            .map_err(|_| DeliveryError::Unreachable(to.clone()))
    }
}
