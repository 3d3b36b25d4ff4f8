//! The node: configuration, startup, and the event loop that owns the engine.
//!
//! Everything that touches the engine runs on one task. Peer messages arrive
//! through the inbox from the server (or the local network), and local calls
//! to [`NodeHandle::request_access`] / [`NodeHandle::release_access`] are
//! posted to the same inbox and answered through a oneshot channel.

use crate::clock::Timestamp;
use crate::config::{ConnectPolicy, NodeConfig};
use crate::engine::{Engine, Outbound};
use crate::error::{Error, ProtocolViolation, Result};
use crate::event::{self, Event, EventQueue, Inbox, Responder};
use crate::message::{Message, NodeId};
use crate::server::Server;
use crate::sync::{status_channel, NodeStatus, StatusFlag, StatusPublisher};
use crate::transport::{LocalNetwork, TcpTransport, Transport};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// A configured node that has not started yet.
#[derive(Debug, Clone)]
pub struct Node {
    config: NodeConfig,
}

impl Node {
    pub fn create(name: impl Into<NodeId>, listen_address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            config: NodeConfig::new(name, listen_address)?,
        })
    }

    pub fn from_config(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Registers a peer. Peers are fixed once the node starts.
    pub fn add_peer(&mut self, id: impl Into<NodeId>, address: impl Into<String>) -> Result<()> {
        Ok(self.config.peers.insert(id.into(), address)?)
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.config.connect = policy;
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.config.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Binds the listen address and starts serving peers over TCP.
    pub async fn start(self) -> Result<NodeHandle> {
        let (inbox, queue) = event::bounded(self.config.queue_capacity());
        let server = Server::bind(&self.config.listen_address, inbox.clone()).await?;
        let local_addr = server.local_addr()?;
        let transport = Arc::new(TcpTransport::new(&self.config.peers, self.config.connect));

        let shutdown = CancellationToken::new();
        let span = info_span!("node", id = %self.config.id);
        info!(parent: &span, %local_addr, peers = self.config.peers.len(), "listening");
        let server_task = tokio::spawn(server.run(shutdown.child_token()).instrument(span));

        Ok(self.launch(inbox, queue, transport, shutdown, vec![server_task], Some(local_addr)))
    }

    /// Starts the node on an in-process network instead of TCP.
    pub async fn start_local(self, network: &LocalNetwork) -> Result<NodeHandle> {
        let (inbox, queue) = event::bounded(self.config.queue_capacity());
        network.register(self.config.id.clone(), inbox.clone()).await;
        let transport = Arc::new(network.endpoint(self.config.id.clone()));

        Ok(self.launch(inbox, queue, transport, CancellationToken::new(), Vec::new(), None))
    }

    fn launch(
        self,
        inbox: Inbox,
        queue: EventQueue,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
        mut tasks: Vec<JoinHandle<()>>,
        local_addr: Option<SocketAddr>,
    ) -> NodeHandle {
        let NodeConfig {
            id,
            peers,
            shutdown_grace,
            ..
        } = self.config;

        let engine = Engine::new(id.clone(), peers.ids().cloned());
        let (publisher, status) = status_channel(NodeStatus::from(&engine));
        let event_loop = EventLoop {
            engine,
            queue,
            transport,
            status: publisher,
            sends: JoinSet::new(),
            shutdown: shutdown.clone(),
            grace: shutdown_grace,
        };

        let span = info_span!("node", id = %id);
        tasks.push(tokio::spawn(event_loop.run().instrument(span)));

        NodeHandle {
            id,
            inbox,
            status,
            shutdown,
            tasks,
            local_addr,
        }
    }
}

/// Single consumer of a node's inbox.
struct EventLoop {
    engine: Engine,
    queue: EventQueue,
    transport: Arc<dyn Transport>,
    status: StatusPublisher,
    sends: JoinSet<()>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.queue.next() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                Some(joined) = self.sends.join_next(), if !self.sends.is_empty() => {
                    if let Err(e) = joined {
                        warn!("send task failed: {e}");
                    }
                }
            }
        }

        self.queue.close();
        self.drain_sends().await;
        info!("stopped");
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::LocalRequestAccess(responder) => {
                let result = self.engine.request_access();
                self.answer(responder, result);
            }
            Event::LocalReleaseAccess(responder) => {
                let result = self.engine.release_access();
                self.answer(responder, result);
            }
            Event::Request(request) => self.on_message(request.into()),
            Event::Reply(reply) => self.on_message(reply.into()),
            Event::Release(release) => self.on_message(release.into()),
        }
    }

    /// Sends a local call's messages, publishes, then answers the caller.
    fn answer(
        &mut self,
        responder: Responder,
        result: std::result::Result<(Timestamp, Vec<Outbound>), ProtocolViolation>,
    ) {
        let result = match result {
            Ok((timestamp, outbound)) => {
                self.dispatch(outbound);
                Ok(timestamp)
            }
            Err(violation) => {
                warn!("rejected local call: {violation}");
                Err(Error::from(violation))
            }
        };
        self.status.publish(&self.engine);
        // The caller may have given up waiting.
        let _ = responder.send(result);
    }

    fn on_message(&mut self, message: Message) {
        match self.engine.on_message(message) {
            Ok(effects) => self.dispatch(effects.outbound),
            Err(violation) => warn!("ignoring message: {violation}"),
        }
        self.status.publish(&self.engine);
    }

    /// One task per outbound message. Failures are logged, never retried.
    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            let transport = Arc::clone(&self.transport);
            let send = async move {
                let kind = message.kind();
                if let Err(e) = transport.send(&to, message).await {
                    warn!(peer = %to, kind, "delivery failed: {e}");
                }
            };
            self.sends.spawn(send.in_current_span());
        }
    }

    /// Waits up to the grace period for in-flight sends, then abandons them.
    async fn drain_sends(&mut self) {
        let sends = &mut self.sends;
        let drained = tokio::time::timeout(self.grace, async {
            while sends.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(abandoned = sends.len(), "abandoning in-flight sends");
            sends.shutdown().await;
        }
    }
}

/// Handle to a running node.
#[derive(Debug)]
pub struct NodeHandle {
    id: NodeId,
    inbox: Inbox,
    status: StatusFlag,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl NodeHandle {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Address the TCP listener is bound to; `None` on a local network.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn call(&self, event: fn(Responder) -> Event) -> Result<Timestamp> {
        let (tx, rx) = oneshot::channel();
        self.inbox.post(event(tx)).await?;
        rx.await.map_err(|_| Error::NodeStopped)?
    }

    /// Broadcasts a request for the critical section.
    ///
    /// Returns the request's timestamp as soon as it is sent; entry happens
    /// later, see [`NodeHandle::wait_for_critical_section`].
    pub async fn request_access(&self) -> Result<Timestamp> {
        self.call(Event::LocalRequestAccess).await
    }

    /// Leaves the critical section and sends every deferred reply.
    pub async fn release_access(&self) -> Result<Timestamp> {
        self.call(Event::LocalReleaseAccess).await
    }

    pub fn in_critical_section(&self) -> bool {
        self.status.in_critical_section()
    }

    pub async fn wait_for_critical_section(&self) -> Result<()> {
        self.status.wait_for_critical_section().await
    }

    /// Requests access and waits until it is granted.
    pub async fn acquire(&self) -> Result<Timestamp> {
        let timestamp = self.request_access().await?;
        self.wait_for_critical_section().await?;
        Ok(timestamp)
    }

    pub fn status(&self) -> NodeStatus {
        self.status.read()
    }

    pub fn status_flag(&self) -> StatusFlag {
        self.status.clone()
    }

    /// Stops the node and waits for its tasks.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.map_err(io::Error::other)?;
        }
        Ok(())
    }
}
