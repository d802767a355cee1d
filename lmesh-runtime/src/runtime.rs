//! Node supervisor
//!
//! [`spawn_node`] runs a node on its own task and restarts it whenever it hits
//! a fatal condition. A fresh incarnation starts from `Down` with empty
//! registers and a bumped scheduling epoch, so nothing scheduled by the failed
//! one survives the restart.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, info_span, warn, Instrument};

use lmesh_core::NodeStatus;

use crate::client::NodeSnapshot;
use crate::config::NodeConfig;
use crate::node::{Collaborators, Exit, Node, NodeEvent, Wiring};

/// Handle to a running node
#[derive(Clone)]
pub struct NodeHandle {
    identity: u64,
    mailbox: mpsc::UnboundedSender<NodeEvent>,
    status: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Latest published status
    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    /// Queue application data for upward delivery
    pub fn feed_data(&self, data: Vec<u8>) -> bool {
        self.mailbox.send(NodeEvent::FeedData(data)).is_ok()
    }

    /// Current node state, none while the node is restarting or gone
    pub async fn snapshot(&self) -> Option<NodeSnapshot> {
        let (reply, response) = oneshot::channel();
        self.mailbox.send(NodeEvent::Snapshot(reply)).ok()?;
        response.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.mailbox.send(NodeEvent::Shutdown);
    }
}

/// Spawn a supervised node and schedule its first wake
pub fn spawn_node(config: NodeConfig, collaborators: Collaborators) -> NodeHandle {
    let identity = config.identity;
    let (mailbox, mut events) = mpsc::unbounded_channel();
    let (status_tx, status) = watch::channel(NodeStatus::Down);
    let wiring = Wiring {
        mailbox: mailbox.clone(),
        epoch: Arc::new(AtomicU64::new(0)),
        status: Arc::new(status_tx),
    };

    let supervisor = async move {
        let mut incarnation = 0u32;
        loop {
            incarnation += 1;
            let mut node = Node::with_wiring(config.clone(), collaborators.clone(), wiring.clone());
            info!(incarnation, "Node starting");
            node.start();

            match node.run(&mut events).await {
                Exit::Shutdown => {
                    node.stop();
                    break;
                }
                Exit::Fatal(reason) => {
                    warn!(incarnation, %reason, "Node failed, restarting");
                    drop(node);
                    if !wait_restart(&mut events, config.restart_delay()).await {
                        break;
                    }
                }
            }
        }
        info!("Node stopped");
    };
    tokio::spawn(supervisor.instrument(info_span!("node", identity)));

    NodeHandle {
        identity,
        mailbox,
        status,
    }
}

/// Sit out the restart delay, false if shutdown was requested meanwhile
async fn wait_restart(events: &mut mpsc::UnboundedReceiver<NodeEvent>, delay: Duration) -> bool {
    let restart = tokio::time::sleep(delay);
    tokio::pin!(restart);
    loop {
        tokio::select! {
            _ = &mut restart => return true,
            event = events.recv() => match event {
                Some(NodeEvent::Shutdown) | None => return false,
                // everything addressed to the failed incarnation is void
                Some(_) => {}
            },
        }
    }
}
