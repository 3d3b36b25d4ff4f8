#![allow(dead_code)]

use lamport_mutex::{LocalNetwork, Node, NodeHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Placeholder address for nodes that only live on a [`LocalNetwork`].
pub fn local_address(i: usize) -> String {
    format!("127.0.0.1:{}", 7000 + i)
}

/// Starts one node per name, each peered with all the others.
pub async fn local_cluster(names: &[&str]) -> (LocalNetwork, Vec<NodeHandle>) {
    local_cluster_with(names, |node| node).await
}

pub async fn local_cluster_with(
    names: &[&str],
    customize: impl Fn(Node) -> Node,
) -> (LocalNetwork, Vec<NodeHandle>) {
    let network = LocalNetwork::new();
    let mut handles = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let mut node = Node::create(*name, local_address(i)).unwrap();
        for (j, peer) in names.iter().enumerate() {
            if i != j {
                node.add_peer(*peer, local_address(j)).unwrap();
            }
        }
        handles.push(customize(node).start_local(&network).await.unwrap());
    }

    (network, handles)
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition never held");
}

/// Counts nodes inside the critical section and remembers the peak.
#[derive(Clone, Default)]
pub struct Occupancy {
    inside: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    entries: Arc<AtomicUsize>,
}

impl Occupancy {
    pub fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// Enters and leaves the critical section `rounds` times.
pub async fn contend(node: Arc<NodeHandle>, occupancy: Occupancy, rounds: usize) {
    for _ in 0..rounds {
        node.acquire().await.unwrap();
        occupancy.enter();
        tokio::time::sleep(Duration::from_millis(1)).await;
        occupancy.leave();
        node.release_access().await.unwrap();
    }
}
