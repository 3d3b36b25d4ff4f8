use crate::clock::Timestamp;
use crate::engine::{Engine, Phase};
use crate::error::{Error, Result};
use tokio::sync::watch;

/// Snapshot of a node's engine, published after every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub phase: Phase,
    pub clock: Timestamp,
    pub outstanding_timestamp: Timestamp,
    pub reply_count: usize,
    pub deferred: usize,
}

impl From<&Engine> for NodeStatus {
    fn from(engine: &Engine) -> Self {
        Self {
            phase: engine.phase(),
            clock: engine.clock(),
            outstanding_timestamp: engine.outstanding_timestamp(),
            reply_count: engine.reply_count(),
            deferred: engine.deferred().len(),
        }
    }
}

/// Writer side, held by the event loop.
#[derive(Debug)]
pub struct StatusPublisher(watch::Sender<NodeStatus>);

/// Reader side. Clones observe the same node.
#[derive(Debug, Clone)]
pub struct StatusFlag(watch::Receiver<NodeStatus>);

pub fn status_channel(initial: NodeStatus) -> (StatusPublisher, StatusFlag) {
    let (tx, rx) = watch::channel(initial);
    (StatusPublisher(tx), StatusFlag(rx))
}

impl StatusPublisher {
    /// Publishes `engine`'s state, waking waiters only when it changed.
    pub fn publish(&self, engine: &Engine) {
        let status = NodeStatus::from(engine);
        self.0.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl StatusFlag {
    pub fn read(&self) -> NodeStatus {
        *self.0.borrow()
    }

    pub fn in_critical_section(&self) -> bool {
        self.0.borrow().phase == Phase::InCriticalSection
    }

    /// Waits until the node is in the critical section.
    pub async fn wait_for_critical_section(&self) -> Result<()> {
        self.wait_for_phase(Phase::InCriticalSection).await
    }

    pub async fn wait_for_phase(&self, phase: Phase) -> Result<()> {
        let mut rx = self.0.clone();
        rx.wait_for(|status| status.phase == phase)
            .await
            .map(|_| ())
            .map_err(|_| Error::NodeStopped)
    }
}
