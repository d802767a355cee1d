//! # LMESH Runtime
//!
//! Async node runtime for the lmesh radio mesh.
//!
//! Provides:
//! - The node state machine as a per-node actor with its own scheduler
//! - Supervised restart of nodes after fatal link anomalies
//! - Collaborator traits for the radio, the controller and the data sink
//! - A simulated radio medium and in-process collaborators for whole-mesh runs

pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod runtime;
pub mod scheduler;
pub mod simulation;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    ControllerClient, DataRecord, DataSink, LocalControllerClient, MemoryDataSink, MeshClock, NoDataSink, NodeSnapshot,
};
pub use config::{NodeConfig, SimulationConfig};
pub use error::{ClientError, NodeError, SimulationError};
pub use node::{Collaborators, Node, NodeEvent};
pub use runtime::{spawn_node, NodeHandle};
pub use scheduler::{Scheduler, Task};
pub use simulation::{MeshMember, SimulatedMesh, Topology};
pub use transport::{Observer, SimulatedMedium, SimulatedTransport, Transport};
