//! # LMESH Core
//!
//! Protocol primitives for a controller-managed radio mesh.
//!
//! Nodes talk over a slow, lossy, half-duplex radio channel. Every frame
//! carries a 16-bit header with a 6-bit address, a 5-bit sequence counter and
//! three type bits. A controller with a direct link to one (or a few) root
//! nodes computes every route centrally and pushes forwarding deltas down the
//! mesh as short text commands.
//!
//! ## Core Concepts
//!
//! - **Header / Message**: the bit-packed wire format and its type taxonomy
//! - **ForwardingCache**: a fixed ring of forwarded messages for resending
//! - **CorrespondenceRegister**: per-link counters with sliding-window loss detection
//! - **LinkQualityRegister**: reception ratios measured from neighbour Hellos
//! - **Controller**: address allocation, shortest-path routing and route deltas
//!
//! ## Example
//!
//! ```rust
//! use lmesh_core::{CorrespondenceRegister, ForwardingCache, Header, MessageType};
//!
//! // A node packs an upward data message on its uplink
//! let mut uplink = CorrespondenceRegister::from(5);
//! let message = uplink.pack_and_increment(MessageType::Data, b"21.5C".to_vec());
//!
//! // Forwarders keep a copy so it can be resent when traced
//! let mut cache = ForwardingCache::default();
//! cache.store(message.clone());
//!
//! let restored = cache.restore(Header::tracing(5, 0)).unwrap();
//! assert!(restored.header.is_resend());
//! ```

pub mod cache;
pub mod channel;
pub mod command;
pub mod controller;
pub mod correspondence;
pub mod directory;
pub mod error;
pub mod link_quality;
pub mod payload;
pub mod routing;
pub mod status;
pub mod wire;

pub use cache::{ForwardingCache, DEFAULT_CACHE_CAPACITY};
pub use channel::{ChannelInfo, RENDEZVOUS_CODE};
pub use command::Command;
pub use controller::{Controller, ControllerConfig};
pub use correspondence::{lock_register, CorrespondenceRegister, LossPolicy, SharedCorrespondence};
pub use directory::{Directory, NodeRecord};
pub use error::{CommandError, ControllerError, Result, WireError};
pub use link_quality::{LinkQualityConfig, LinkQualityRegister};
pub use payload::{Invite, JoinReport, JoinRequest};
pub use routing::{apply_delta, compute_routes, route_delta, RouteNode, RoutingTable};
pub use status::NodeStatus;
pub use wire::{Header, Message, MessageType};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
