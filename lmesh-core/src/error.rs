//! Error types for LMESH core

use thiserror::Error;

/// Result type alias for wire decoding
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while decoding headers, frames and payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Type bits do not resolve to any pure message type
    #[error("Unknown message type bits: {0:#05b}")]
    UnknownType(u8),

    /// Frame too short to hold a header
    #[error("Frame of {0} bytes is shorter than the header")]
    ShortFrame(usize),

    /// Payload does not have the expected layout
    #[error("Malformed payload: {0}")]
    MalformedPayload(&'static str),
}

/// Errors raised while parsing controller commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Invalid target address: {0}")]
    InvalidTarget(String),

    #[error("Missing verb in command: {0}")]
    MissingVerb(String),

    /// Only invite, trace and update are valid verbs
    #[error("Unrecognized command verb: {0}")]
    UnknownVerb(String),

    #[error("Invalid argument for {verb}: {argument}")]
    InvalidArgument { verb: &'static str, argument: String },
}

/// Errors raised by the controller routing engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Every address in the configured range is already allocated
    #[error("Address space exhausted ({0} addresses allocated)")]
    AddressSpaceExhausted(u8),

    /// No node record holds this address
    #[error("Unknown node address: {0}")]
    UnknownAddress(u8),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}
