//! Listener that receives peer messages and feeds them into the inbox.

use crate::error::{Error, Result};
use crate::event::Inbox;
use crate::message::{Confirm, Message};
use crate::transport::{lines, Lines};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Server {
    listener: TcpListener,
    inbox: Inbox,
}

impl Server {
    pub async fn bind(address: &str, inbox: Inbox) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| Error::Bind {
                address: address.to_string(),
                source,
            })?;
        Ok(Self { listener, inbox })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Answers one peer connection until it closes.
    ///
    /// The confirmation for a line is only written once the message sits in
    /// the inbox, so a full inbox holds the sending peer back.
    async fn handle(stream: TcpStream, address: SocketAddr, inbox: Inbox) -> Result<()> {
        let mut lines: Lines = lines(stream);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(%address, "dropping connection: {e}");
                    break;
                }
            };

            let confirm = match Message::from_json_string(&line) {
                Ok(message) => {
                    debug!(%address, kind = message.kind(), from = %message.sender(), "received");
                    inbox.post(message).await?;
                    Confirm::Ack
                }
                Err(e) => {
                    warn!(%address, "rejecting malformed message: {e}");
                    Confirm::Rejected {
                        reason: e.to_string(),
                    }
                }
            };

            let answer = confirm
                .to_json_string()
                .map_err(|e| Error::Io(e.into()))?;
            if let Err(e) = lines.send(answer).await {
                warn!(%address, "could not confirm: {e}");
                break;
            }
        }

        debug!(%address, "connection closed");
        Ok(())
    }

    /// Accepts peers until `shutdown` fires, then drops every connection.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        info!(%address, "accepted a connection");
                        stream.set_nodelay(true).ok();
                        let inbox = self.inbox.clone();
                        connections.spawn(async move {
                            if let Err(e) = Self::handle(stream, address, inbox).await {
                                debug!(%address, "connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
    }
}
