//! Controller and data sink collaborators
//!
//! A node only talks to the controller when it is the mesh root (status
//! Controller). Everything else reaches the controller through the mesh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use lmesh_core::{ChannelInfo, Controller, Message, NodeStatus, SharedCorrespondence};

use crate::error::ClientError;

/// Observable state of a node, sent with controller heartbeats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub identity: u64,
    pub status: NodeStatus,
    pub address: Option<u8>,
    /// Current link estimates per neighbour
    pub links: BTreeMap<u8, f64>,
    /// Routing keys this node forwards
    pub routing: BTreeSet<u8>,
}

/// Node-side view of the controller
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Operating channel if this node has a direct controller link
    async fn heartbeat(&self, snapshot: &NodeSnapshot) -> Result<Option<ChannelInfo>, ClientError>;

    /// Address for `identity`; `mediator` relayed the join, if any
    async fn allocate_address(&self, identity: u64, mediator: Option<u8>) -> Result<u8, ClientError>;

    /// Controller-side register of the node at `address`
    async fn correspondence(&self, address: u8) -> Result<SharedCorrespondence, ClientError>;

    /// Hand an upward message to the controller, returns textual commands
    async fn feed(&self, controller_identity: u64, message: &Message) -> Result<Vec<String>, ClientError>;
}

/// Sink for application data reaching the mesh root
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn heartbeat(&self) -> bool;

    /// Store a data message, returns uplink counters found missing
    async fn feed(&self, message: &Message) -> Result<Vec<u8>, ClientError>;
}

/// Wall-clock timestamps that advance with the tokio clock
///
/// Node freshness is judged on these, so a paused runtime ages the directory
/// at simulated speed.
#[derive(Debug, Clone, Copy)]
pub struct MeshClock {
    origin: Instant,
    epoch: DateTime<Utc>,
}

impl MeshClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            epoch: Utc::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + elapsed
    }
}

impl Default for MeshClock {
    fn default() -> Self {
        Self::start()
    }
}

/// In-process controller client sharing one [`Controller`]
#[derive(Clone)]
pub struct LocalControllerClient {
    controller: Arc<Mutex<Controller>>,
    /// Whether this node has a direct link to the controller
    linked: Arc<AtomicBool>,
    clock: MeshClock,
}

impl LocalControllerClient {
    pub fn new(controller: Arc<Mutex<Controller>>, linked: bool) -> Self {
        Self {
            controller,
            linked: Arc::new(AtomicBool::new(linked)),
            clock: MeshClock::start(),
        }
    }

    /// Share the clock of the other clients of the same controller
    pub fn with_clock(mut self, clock: MeshClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::SeqCst);
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    fn ensure_linked(&self) -> Result<(), ClientError> {
        if self.is_linked() {
            Ok(())
        } else {
            Err(ClientError::Unavailable("no direct controller link".to_string()))
        }
    }
}

#[async_trait]
impl ControllerClient for LocalControllerClient {
    async fn heartbeat(&self, snapshot: &NodeSnapshot) -> Result<Option<ChannelInfo>, ClientError> {
        if !self.is_linked() {
            return Ok(None);
        }
        debug!(identity = snapshot.identity, status = %snapshot.status, "Controller heartbeat");
        Ok(Some(self.controller.lock().await.mesh_channel().clone()))
    }

    async fn allocate_address(&self, identity: u64, mediator: Option<u8>) -> Result<u8, ClientError> {
        self.ensure_linked()?;
        let now = self.clock.now();
        Ok(self.controller.lock().await.allocate_address_at(identity, mediator, now)?)
    }

    async fn correspondence(&self, address: u8) -> Result<SharedCorrespondence, ClientError> {
        self.ensure_linked()?;
        Ok(self.controller.lock().await.correspondence(address)?)
    }

    async fn feed(&self, controller_identity: u64, message: &Message) -> Result<Vec<String>, ClientError> {
        self.ensure_linked()?;
        let now = self.clock.now();
        let commands = self.controller.lock().await.feed_at(controller_identity, message, now)?;
        Ok(commands.iter().map(ToString::to_string).collect())
    }
}

/// Data sink for meshes that carry no application data
#[derive(Debug, Clone, Default)]
pub struct NoDataSink;

#[async_trait]
impl DataSink for NoDataSink {
    async fn heartbeat(&self) -> bool {
        false
    }

    async fn feed(&self, message: &Message) -> Result<Vec<u8>, ClientError> {
        Err(ClientError::Rejected(format!("no data sink for {}", message)))
    }
}

/// A data payload received at the mesh root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub address: u8,
    pub counter: u8,
    pub payload: Vec<u8>,
    pub resend: bool,
}

/// In-memory data sink
///
/// When attached to a controller, losses are detected on the sender's uplink
/// register, which all upward message types of that node share.
#[derive(Clone, Default)]
pub struct MemoryDataSink {
    records: Arc<Mutex<Vec<DataRecord>>>,
    controller: Option<Arc<Mutex<Controller>>>,
}

impl MemoryDataSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(controller: Arc<Mutex<Controller>>) -> Self {
        Self {
            records: Arc::default(),
            controller: Some(controller),
        }
    }

    pub async fn records(&self) -> Vec<DataRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DataSink for MemoryDataSink {
    async fn heartbeat(&self) -> bool {
        true
    }

    async fn feed(&self, message: &Message) -> Result<Vec<u8>, ClientError> {
        self.records.lock().await.push(DataRecord {
            address: message.header.node_address(),
            counter: message.header.counter(),
            payload: message.payload.clone(),
            resend: message.header.is_resend(),
        });

        let Some(controller) = &self.controller else {
            return Ok(Vec::new());
        };
        match controller.lock().await.register_losses(message) {
            Ok(lost) => Ok(lost),
            Err(error) => {
                warn!(%error, %message, "Data from unknown sender");
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmesh_core::{ControllerConfig, CorrespondenceRegister, MessageType};

    fn snapshot() -> NodeSnapshot {
        NodeSnapshot {
            identity: 1,
            status: NodeStatus::Down,
            address: None,
            links: BTreeMap::new(),
            routing: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_follows_link_flag() {
        let controller = Arc::new(Mutex::new(Controller::new(ControllerConfig::default())));
        let client = LocalControllerClient::new(controller, false);
        assert_eq!(client.heartbeat(&snapshot()).await.unwrap(), None);
        assert!(client.allocate_address(1, None).await.is_err());

        client.set_linked(true);
        assert!(client.heartbeat(&snapshot()).await.unwrap().is_some());
        assert_eq!(client.allocate_address(1, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feed_returns_command_strings() {
        let controller = Arc::new(Mutex::new(Controller::new(ControllerConfig::default())));
        let client = LocalControllerClient::new(controller, true);
        let root = client.allocate_address(1, None).await.unwrap();

        let mut uplink = CorrespondenceRegister::from(root);
        uplink.pack_and_increment(MessageType::Data, vec![]);
        let message = uplink.pack_and_increment(MessageType::UpwardsRouting, vec![]);

        let commands = client.feed(1, &message).await.unwrap();
        assert_eq!(commands, vec!["1 trace 0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = MeshClock::start();
        let before = clock.now();
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert_eq!((clock.now() - before).num_seconds(), 600);
    }

    #[tokio::test]
    async fn test_memory_sink_detects_losses() {
        let controller = Arc::new(Mutex::new(Controller::new(ControllerConfig::default())));
        let address = controller.lock().await.allocate_address(5, None).unwrap();
        let sink = MemoryDataSink::attached(Arc::clone(&controller));

        let mut uplink = CorrespondenceRegister::from(address);
        let first = uplink.pack_and_increment(MessageType::Data, b"a".to_vec());
        uplink.pack_and_increment(MessageType::Data, b"b".to_vec());
        let third = uplink.pack_and_increment(MessageType::Data, b"c".to_vec());

        assert!(sink.feed(&first).await.unwrap().is_empty());
        assert_eq!(sink.feed(&third).await.unwrap(), vec![1]);
        assert_eq!(sink.records().await.len(), 2);
        assert!(MemoryDataSink::new().feed(&first).await.unwrap().is_empty());
    }
}
