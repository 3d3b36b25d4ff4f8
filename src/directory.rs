//! Static mapping from peer identity to address, fixed at startup.

use crate::error::ConfigError;
use crate::message::NodeId;
use std::collections::BTreeMap;

/// Checks that `address` looks like `host:port`.
pub fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing `:port`"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    match port.parse::<u16>() {
        Ok(_) => Ok(()),
        Err(_) => Err(invalid("port is not a number in 0..=65535")),
    }
}

/// Peers of one node. Built once, then shared read-only.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    own_id: NodeId,
    peers: BTreeMap<NodeId, String>,
}

impl PeerDirectory {
    pub fn new(own_id: NodeId) -> Self {
        Self {
            own_id,
            peers: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: NodeId, address: impl Into<String>) -> Result<(), ConfigError> {
        let address = address.into();
        if id.as_str().is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        if id == self.own_id {
            return Err(ConfigError::SelfPeer(id));
        }
        validate_address(&address)?;
        if self.peers.contains_key(&id) {
            return Err(ConfigError::DuplicatePeer(id));
        }
        self.peers.insert(id, address);
        Ok(())
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    pub fn address(&self, id: &NodeId) -> Option<&str> {
        self.peers.get(id).map(String::as_str)
    }

    /// Peer identities in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.peers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &str)> {
        self.peers.iter().map(|(id, addr)| (id, addr.as_str()))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
