//! Error types for the node runtime

use thiserror::Error;

use lmesh_core::{CommandError, ControllerError, WireError};

/// Failures of the controller and data sink collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The backing service cannot be reached from this node
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The backing service refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),
}

/// Errors raised while a node handles an event
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// The node's role or connectivity assumption no longer holds
    #[error("Fatal node condition: {0}")]
    Fatal(String),

    /// The node has no operating channel to transmit on
    #[error("No operating channel set")]
    ChannelUnset,
}

/// Errors raised while parsing simulation settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// Only line, star and grid layouts exist
    #[error("Unknown topology: {0}")]
    UnknownTopology(String),
}
