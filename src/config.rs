//! Node configuration and the command line that builds it.

use crate::directory::{validate_address, PeerDirectory};
use crate::error::{ConfigError, Result};
use crate::event::capacity_for;
use crate::message::NodeId;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// How hard a sender tries to open a connection to a peer.
///
/// Only connecting is retried. A message that was already written is never
/// sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl ConnectPolicy {
    /// Delay after the `attempt`-th failure: doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub listen_address: String,
    pub peers: PeerDirectory,
    /// Event queue capacity; derived from the peer count when `None`.
    pub queue_capacity: Option<usize>,
    pub connect: ConnectPolicy,
    /// How long shutdown waits for in-flight sends before abandoning them.
    pub shutdown_grace: Duration,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, listen_address: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let listen_address = listen_address.into();
        if id.as_str().is_empty() {
            return Err(ConfigError::EmptyIdentity.into());
        }
        validate_address(&listen_address)?;

        Ok(Self {
            peers: PeerDirectory::new(id.clone()),
            id,
            listen_address,
            queue_capacity: None,
            connect: ConnectPolicy::default(),
            shutdown_grace: Duration::from_secs(1),
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| capacity_for(self.peers.len()))
    }
}

/// Parses `NAME=HOST:PORT`.
fn parse_peer(arg: &str) -> Result<(String, String), String> {
    let (name, address) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=HOST:PORT, got `{arg}`"))?;
    if name.is_empty() {
        return Err(format!("missing peer name in `{arg}`"));
    }
    Ok((name.to_string(), address.to_string()))
}

/// One node of a Ricart-Agrawala cluster.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    /// This node's identity.
    #[arg(long)]
    pub name: String,

    /// Address to listen on for peer messages.
    #[arg(long)]
    pub listen: String,

    /// A peer, as NAME=HOST:PORT. Repeat for every peer.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<(String, String)>,

    /// How many times to enter the critical section (0 = forever).
    #[arg(long, default_value_t = 1)]
    pub rounds: u64,

    /// Average critical section requests per second.
    #[arg(long, default_value_t = crate::RATE)]
    pub rate: f64,

    /// Time spent inside the critical section, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub work_ms: u64,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Connection attempts per peer before a send fails.
    #[arg(long, default_value_t = 5)]
    pub connect_attempts: u32,

    /// Backoff after the first failed connection attempt, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub connect_backoff_ms: u64,
}

impl TryFrom<&CliArgs> for NodeConfig {
    type Error = crate::Error;

    fn try_from(args: &CliArgs) -> Result<Self> {
        let mut config = NodeConfig::new(args.name.as_str(), args.listen.as_str())?;
        for (name, address) in &args.peers {
            config.peers.insert(name.as_str().into(), address.as_str())?;
        }
        config.connect = ConnectPolicy {
            attempts: args.connect_attempts.max(1),
            initial_backoff: Duration::from_millis(args.connect_backoff_ms),
            ..ConnectPolicy::default()
        };
        Ok(config)
    }
}
