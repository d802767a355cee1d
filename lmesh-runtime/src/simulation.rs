//! Whole-mesh simulation
//!
//! Wires a set of supervised nodes to one [`SimulatedMedium`] and one shared
//! [`Controller`]. Nodes flagged as linked reach the controller directly and
//! carry the in-memory data sink; every other node has to join over the air.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use lmesh_core::{Controller, ControllerConfig};

use crate::client::{DataSink, LocalControllerClient, MemoryDataSink, MeshClock, NodeSnapshot};
use crate::config::{NodeConfig, SimulationConfig};
use crate::error::SimulationError;
use crate::node::Collaborators;
use crate::runtime::{spawn_node, NodeHandle};
use crate::transport::SimulatedMedium;

/// First identity handed out by [`SimulatedMesh::with_topology`]
pub const FIRST_IDENTITY: u64 = 1000;

/// Layout of simulated stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Each station hears its predecessor and successor
    Line,
    /// Every station hears the first one only
    Star,
    /// Square grid, row by row, four-neighbourhood
    Grid,
}

impl Topology {
    /// Station index pairs that hear each other
    pub fn links(self, size: usize) -> Vec<(usize, usize)> {
        match self {
            Topology::Line => (1..size).map(|i| (i - 1, i)).collect(),
            Topology::Star => (1..size).map(|i| (0, i)).collect(),
            Topology::Grid => {
                let side = (1..).find(|side| side * side >= size).unwrap_or(1);
                let mut links = Vec::new();
                for i in 0..size {
                    if (i + 1) % side != 0 && i + 1 < size {
                        links.push((i, i + 1));
                    }
                    if i + side < size {
                        links.push((i, i + side));
                    }
                }
                links
            }
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Line => "line",
            Topology::Star => "star",
            Topology::Grid => "grid",
        };
        f.write_str(name)
    }
}

impl FromStr for Topology {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(Topology::Line),
            "star" => Ok(Topology::Star),
            "grid" => Ok(Topology::Grid),
            other => Err(SimulationError::UnknownTopology(other.to_string())),
        }
    }
}

/// A simulated station and its controller link
pub struct MeshMember {
    pub handle: NodeHandle,
    pub client: LocalControllerClient,
}

/// A mesh of supervised nodes on one simulated medium
pub struct SimulatedMesh {
    medium: SimulatedMedium,
    controller: Arc<Mutex<Controller>>,
    data: MemoryDataSink,
    clock: MeshClock,
    members: Vec<MeshMember>,
}

impl SimulatedMesh {
    pub fn new(simulation: SimulationConfig, controller: ControllerConfig) -> Self {
        let controller = Arc::new(Mutex::new(Controller::new(controller)));
        Self {
            medium: SimulatedMedium::new(simulation),
            data: MemoryDataSink::attached(Arc::clone(&controller)),
            controller,
            clock: MeshClock::start(),
            members: Vec::new(),
        }
    }

    /// `size` stations laid out as `topology`, the first one linked to the controller
    pub fn with_topology(
        topology: Topology,
        size: usize,
        reception: f64,
        simulation: SimulationConfig,
        controller: ControllerConfig,
        node: NodeConfig,
    ) -> Self {
        let mut mesh = Self::new(simulation, controller);
        let identities: Vec<u64> = (0..size)
            .map(|i| {
                let config = node.clone().with_identity(FIRST_IDENTITY + i as u64);
                mesh.add_node(config, i == 0)
            })
            .collect();
        for (a, b) in topology.links(size) {
            mesh.connect(identities[a], identities[b], reception);
        }
        info!(%topology, size, reception, "Simulated mesh ready");
        mesh
    }

    /// Spawn a node on the medium, returns its identity
    pub fn add_node(&mut self, config: NodeConfig, linked: bool) -> u64 {
        let identity = config.identity;
        let client = LocalControllerClient::new(Arc::clone(&self.controller), linked).with_clock(self.clock);
        let data_sink = linked.then(|| Arc::new(self.data.clone()) as Arc<dyn DataSink>);
        let collaborators = Collaborators {
            transport: Arc::new(self.medium.attach(identity)),
            controller: Arc::new(client.clone()),
            data_sink,
        };

        let handle = spawn_node(config, collaborators);
        self.members.push(MeshMember { handle, client });
        identity
    }

    /// Symmetric radio link between two stations
    pub fn connect(&self, a: u64, b: u64, reception: f64) {
        self.medium.connect(a, b, reception);
    }

    pub fn nodes(&self) -> &[MeshMember] {
        &self.members
    }

    pub fn node(&self, identity: u64) -> Option<&MeshMember> {
        self.members.iter().find(|member| member.handle.identity() == identity)
    }

    pub fn medium(&self) -> &SimulatedMedium {
        &self.medium
    }

    pub fn controller(&self) -> Arc<Mutex<Controller>> {
        Arc::clone(&self.controller)
    }

    /// Clock the controller judges node freshness by
    pub fn clock(&self) -> MeshClock {
        self.clock
    }

    /// Data received at the mesh root
    pub fn data(&self) -> &MemoryDataSink {
        &self.data
    }

    /// Snapshots of every node that answers
    pub async fn snapshots(&self) -> Vec<NodeSnapshot> {
        let mut snapshots = Vec::with_capacity(self.members.len());
        for member in &self.members {
            if let Some(snapshot) = member.handle.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    pub fn shutdown(&self) {
        for member in &self.members {
            member.handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmesh_core::wire::DOWNWARDS_KEY;
    use lmesh_core::NodeStatus;
    use std::time::Duration;

    #[test]
    fn test_topology_links() {
        assert_eq!(Topology::Line.links(3), vec![(0, 1), (1, 2)]);
        assert_eq!(Topology::Star.links(3), vec![(0, 1), (0, 2)]);
        assert_eq!(
            Topology::Grid.links(4),
            vec![(0, 1), (0, 2), (1, 3), (2, 3)]
        );
        assert_eq!("Grid".parse::<Topology>().unwrap(), Topology::Grid);
        assert_eq!(
            "ring".parse::<Topology>(),
            Err(SimulationError::UnknownTopology("ring".to_string()))
        );
    }

    fn line(size: usize) -> SimulatedMesh {
        SimulatedMesh::with_topology(
            Topology::Line,
            size,
            1.0,
            SimulationConfig::default(),
            ControllerConfig::default(),
            NodeConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_mesh_forms() {
        let mesh = line(3);
        tokio::time::sleep(Duration::from_secs(600)).await;

        let snapshots = mesh.snapshots().await;
        assert_eq!(snapshots.len(), 3);
        let (root, relay, leaf) = (&snapshots[0], &snapshots[1], &snapshots[2]);

        assert_eq!(root.status, NodeStatus::Controller);
        assert_eq!(root.address, Some(1));
        assert_eq!(relay.status, NodeStatus::Node);
        assert_eq!(relay.address, Some(2));
        assert_eq!(leaf.status, NodeStatus::Node);
        assert_eq!(leaf.address, Some(3));

        assert!(relay.routing.contains(&3));
        assert!(relay.routing.contains(&(3 | DOWNWARDS_KEY)));
        assert!(relay.links.contains_key(&1));
        assert!(relay.links.contains_key(&3));
        assert_eq!(mesh.controller().lock().await.directory().len(), 3);
        mesh.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_is_withdrawn() {
        let mesh = line(3);
        tokio::time::sleep(Duration::from_secs(600)).await;
        let relay = &mesh.nodes()[1].handle;
        assert!(relay.snapshot().await.unwrap().routing.contains(&3));

        mesh.nodes()[2].handle.shutdown();
        // past the freshness window plus a couple of link report rounds
        tokio::time::sleep(Duration::from_secs(800)).await;

        let routing = relay.snapshot().await.unwrap().routing;
        assert!(!routing.contains(&3));
        assert!(!routing.contains(&(3 | DOWNWARDS_KEY)));

        let shared = mesh.controller();
        let controller = shared.lock().await;
        let window = chrono::Duration::milliseconds(controller.config().freshness_window_ms as i64);
        let live: Vec<u8> = controller
            .directory()
            .live(mesh.clock().now(), window)
            .map(|record| record.address)
            .collect();
        assert_eq!(live, vec![1, 2]);
        drop(controller);
        mesh.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_reaches_sink() {
        let mesh = line(2);
        tokio::time::sleep(Duration::from_secs(120)).await;

        let leaf = &mesh.nodes()[1].handle;
        assert_eq!(leaf.status(), NodeStatus::Node);
        assert!(leaf.feed_data(b"t=21".to_vec()));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let records = mesh.data().records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 2);
        assert_eq!(records[0].payload, b"t=21".to_vec());
        mesh.shutdown();
    }
}
