//! Ricart-Agrawala mutual exclusion between a fixed set of peers.
//!
//! A node that wants the critical section stamps a request with its Lamport
//! clock, sends it to every peer and enters once each of them has replied.
//! Peers hold their reply back while they are inside the section or while
//! their own pending request comes first in `(timestamp, identity)` order.
//!
//! - [`engine`]: the protocol state machine, free of I/O
//! - [`node`]: runs an engine behind an event queue, over TCP or in memory
//! - [`transport`]: how messages reach peers

pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod event;
pub mod log;
pub mod message;
pub mod node;
pub mod poisson;
pub mod server;
pub mod sync;
pub mod transport;

pub use clock::{LamportClock, Timestamp, MAX_TIMESTAMP};
pub use config::{ConnectPolicy, NodeConfig};
pub use engine::{Engine, Phase};
pub use error::{ConfigError, DeliveryError, Error, ProtocolViolation, Result};
pub use message::{Message, NodeId};
pub use node::{Node, NodeHandle};
pub use sync::NodeStatus;
pub use transport::LocalNetwork;

/// Default critical section requests per second in the demo workload.
pub const RATE: f64 = 1.;
