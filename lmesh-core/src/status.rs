//! Node lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started, or torn down
    #[default]
    Down,
    /// Listening on the rendezvous channel for the mesh channel
    Seeking,
    /// Broadcasting join volleys, waiting for an invite
    Joining,
    /// Member of the mesh
    Node,
    /// Root of the mesh with a direct controller link
    Controller,
    /// Unrecoverable condition, waiting for a restart
    Error,
}

impl NodeStatus {
    pub fn is_alive(self) -> bool {
        !matches!(self, NodeStatus::Down | NodeStatus::Error)
    }

    /// Member of the mesh with an assigned address
    pub fn is_member(self) -> bool {
        matches!(self, NodeStatus::Node | NodeStatus::Controller)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Down => "down",
            NodeStatus::Seeking => "seeking",
            NodeStatus::Joining => "joining",
            NodeStatus::Node => "node",
            NodeStatus::Controller => "controller",
            NodeStatus::Error => "error",
        };
        f.write_str(name)
    }
}
