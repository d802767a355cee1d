//! Wire format - the bit-packed message header
//!
//! Every frame starts with a fixed 16-bit header followed by a short payload.
//! The payload length is carried by the transport framing, never by the header.
//!
//! ```text
//!  15  14  13 | 12 .. 8 | 7 | 6 | 5 .. 0
//! [ type bits ][ counter ][D][M][ node address ]
//! ```
//!
//! - **type bits**: HELLO / ROUTING / TRACE flags, all zero means Data
//! - **counter**: per-correspondence sequence number, wraps at 32
//! - **D**: downwards bit (controller to node)
//! - **M**: multipurpose bit, read as *resend* on a header, *delete* inside a
//!   routing update byte and *resolved* inside a tracing header

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WireError};

/// Mask of the full address byte (direction, multipurpose bit, node address)
pub const ADDRESS_MASK: u16 = 0x00FF;
/// Mask of the 6-bit node address
pub const NODE_ADDRESS_MASK: u16 = 0x003F;
/// Multipurpose bit of the address byte
pub const MULTIPURPOSE_BIT: u16 = 0x0040;
/// Header flag: this message was lost before and must bypass the cache
pub const RESEND_BIT: u16 = MULTIPURPOSE_BIT;
/// Routing update flag: remove the key from the forwarding registry
pub const DELETE_BIT: u16 = MULTIPURPOSE_BIT;
/// Tracing flag: the traced message was found and resent
pub const RESOLVED_BIT: u16 = MULTIPURPOSE_BIT;
/// Direction flag: set when travelling from the controller towards a node
pub const DOWNWARDS_BIT: u16 = 0x0080;

pub const COUNTER_SHIFT: u32 = 8;
pub const COUNTER_BITS: u32 = 5;
/// Number of distinct counter values before wrapping
pub const COUNTER_LIMIT: u8 = 1 << COUNTER_BITS;
pub const COUNTER_MASK: u16 = (COUNTER_LIMIT as u16 - 1) << COUNTER_SHIFT;

pub const TYPE_SHIFT: u32 = COUNTER_SHIFT + COUNTER_BITS;
pub const TYPE_MASK: u16 = 0b111 << TYPE_SHIFT;
pub const HELLO_BIT: u16 = 1 << TYPE_SHIFT;
pub const ROUTING_BIT: u16 = 1 << (TYPE_SHIFT + 1);
pub const TRACE_BIT: u16 = 1 << (TYPE_SHIFT + 2);

/// Bits used to correlate a loss report with a cached message
pub const TRACING_MASK: u16 = ADDRESS_MASK | COUNTER_MASK;

/// Highest node address that fits the header
pub const MESH_ADDRESS_LIMIT: u8 = NODE_ADDRESS_MASK as u8;
/// Address used by nodes that have not joined yet
pub const UNASSIGNED: u8 = 0;

/// Size of the encoded header in a frame
pub const HEADER_LEN: usize = 2;

/// Routing key flag for "forward downwards traffic for this node"
pub const DOWNWARDS_KEY: u8 = DOWNWARDS_BIT as u8;
/// Routing update flag for "stop forwarding for this key"
pub const DELETE_KEY: u8 = DELETE_BIT as u8;

/// The packed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Header(pub u16);

impl Header {
    /// Stamp a header from its three fields
    ///
    /// `address` is the full address byte including direction bits. Each field
    /// is masked to its width so it can never spill into its neighbour.
    pub fn encode(kind: MessageType, address: u8, counter: u8) -> Self {
        let counter = (counter % COUNTER_LIMIT) as u16;
        Header(kind.binary() | (address as u16 & ADDRESS_MASK) | (counter << COUNTER_SHIFT))
    }

    /// Header of a tracing entry: address byte plus counter
    pub fn tracing(address: u8, counter: u8) -> Self {
        let counter = (counter % COUNTER_LIMIT) as u16;
        Header((address as u16 & ADDRESS_MASK) | (counter << COUNTER_SHIFT))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Full address byte, including direction and multipurpose bits
    pub fn address(self) -> u8 {
        (self.0 & ADDRESS_MASK) as u8
    }

    /// The 6-bit node address
    pub fn node_address(self) -> u8 {
        (self.0 & NODE_ADDRESS_MASK) as u8
    }

    pub fn counter(self) -> u8 {
        ((self.0 & COUNTER_MASK) >> COUNTER_SHIFT) as u8
    }

    /// Forwarding registry key: node address plus direction, multipurpose bit cleared
    pub fn routing_address(self) -> u8 {
        (self.0 & (NODE_ADDRESS_MASK | DOWNWARDS_BIT)) as u8
    }

    /// Tracing header for a lost `counter` of the opposite direction
    ///
    /// Type and counter bits are cut out, the direction is flipped and the
    /// given counter is stamped in.
    pub fn tracing_header(self, counter: u8) -> Header {
        let base = (self.0 & !TYPE_MASK & !COUNTER_MASK) ^ DOWNWARDS_BIT;
        Header(base | (((counter % COUNTER_LIMIT) as u16) << COUNTER_SHIFT))
    }

    pub fn is_downwards(self) -> bool {
        self.0 & DOWNWARDS_BIT != 0
    }

    pub fn is_resend(self) -> bool {
        self.0 & RESEND_BIT != 0
    }

    pub fn with_resend(self) -> Header {
        Header(self.0 | RESEND_BIT)
    }

    pub fn with_resolved(self) -> Header {
        Header(self.0 | RESOLVED_BIT)
    }

    pub fn without_multipurpose(self) -> Header {
        Header(self.0 & !MULTIPURPOSE_BIT)
    }

    /// Resolve the pure type (Hello, Join, Routing, Trace or Data)
    pub fn pure_type(self) -> Result<MessageType> {
        MessageType::pure(self)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Message classes, each defined by a (bitmask, required bits) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Any,
    Upwards,
    Downwards,
    Resend,
    /// Link probe. Receivers measure reliability from the Hellos they hear.
    /// With node address 0 it is a request to join the mesh.
    Hello,
    /// Join report (upwards) or join acceptance (downwards)
    Join,
    UpwardsJoin,
    DownwardsJoin,
    /// Upwards: link reliabilities. Downwards: routing registry updates.
    Routing,
    UpwardsRouting,
    DownwardsRouting,
    /// Request to resend messages lost on their path
    Trace,
    Resolved,
    /// Application data, interpretation is left to the data sink
    Data,
}

impl MessageType {
    pub const ALL: [MessageType; 14] = [
        MessageType::Any,
        MessageType::Upwards,
        MessageType::Downwards,
        MessageType::Resend,
        MessageType::Hello,
        MessageType::Join,
        MessageType::UpwardsJoin,
        MessageType::DownwardsJoin,
        MessageType::Routing,
        MessageType::UpwardsRouting,
        MessageType::DownwardsRouting,
        MessageType::Trace,
        MessageType::Resolved,
        MessageType::Data,
    ];

    /// The five types a header can resolve to when direction and resend are ignored
    pub const PURE: [MessageType; 5] = [
        MessageType::Hello,
        MessageType::Join,
        MessageType::Routing,
        MessageType::Trace,
        MessageType::Data,
    ];

    /// Bits of the header this type inspects
    pub const fn bitmask(self) -> u16 {
        match self {
            MessageType::Any => 0,
            MessageType::Upwards | MessageType::Downwards => DOWNWARDS_BIT,
            MessageType::Resend | MessageType::Resolved => MULTIPURPOSE_BIT,
            MessageType::Hello
            | MessageType::Join
            | MessageType::Routing
            | MessageType::Trace
            | MessageType::Data => TYPE_MASK,
            MessageType::UpwardsJoin
            | MessageType::DownwardsJoin
            | MessageType::UpwardsRouting
            | MessageType::DownwardsRouting => TYPE_MASK | DOWNWARDS_BIT,
        }
    }

    /// Value the inspected bits must have
    pub const fn binary(self) -> u16 {
        match self {
            MessageType::Any | MessageType::Upwards | MessageType::Data => 0,
            MessageType::Downwards => DOWNWARDS_BIT,
            MessageType::Resend => RESEND_BIT,
            MessageType::Resolved => RESOLVED_BIT,
            MessageType::Hello => HELLO_BIT,
            MessageType::Join | MessageType::UpwardsJoin => HELLO_BIT | ROUTING_BIT,
            MessageType::DownwardsJoin => HELLO_BIT | ROUTING_BIT | DOWNWARDS_BIT,
            MessageType::Routing | MessageType::UpwardsRouting => ROUTING_BIT,
            MessageType::DownwardsRouting => ROUTING_BIT | DOWNWARDS_BIT,
            MessageType::Trace => TRACE_BIT,
        }
    }

    pub fn matches(self, header: Header) -> bool {
        header.0 & self.bitmask() == self.binary()
    }

    pub fn is_pure(self) -> bool {
        self.bitmask() == TYPE_MASK
    }

    /// Classify a header ignoring direction and resend bits
    pub fn pure(header: Header) -> Result<MessageType> {
        let bits = header.0 & TYPE_MASK;
        Self::PURE
            .into_iter()
            .find(|kind| kind.binary() == bits)
            .ok_or(WireError::UnknownType((bits >> TYPE_SHIFT) as u8))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An immutable header + payload pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(header: Header, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Check the header against a message class
    pub fn is(&self, kind: MessageType) -> bool {
        kind.matches(self.header)
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Copy of this message flagged for resending
    pub fn resend(&self) -> Message {
        Message::new(self.header.with_resend(), self.payload.clone())
    }

    /// Encode as a transport frame: big-endian header, then payload
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&self.header.0.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Decode a transport frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(WireError::ShortFrame(frame.len()));
        }
        let header = Header(u16::from_be_bytes([frame[0], frame[1]]));
        Ok(Self::new(header, &frame[HEADER_LEN..]))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.header.pure_type() {
            Ok(kind) => kind.to_string(),
            Err(_) => format!("Invalid({})", self.header),
        };
        let direction = if self.header.is_downwards() { "to" } else { "from" };
        let resend = if self.header.is_resend() { " (resend)" } else { "" };
        write!(
            f,
            "{}#{} {} {}{}: {:?}",
            kind,
            self.header.counter(),
            direction,
            self.header.node_address(),
            resend,
            self.payload
        )
    }
}
