//! Controller routing engine
//!
//! The controller owns the node directory. It hands out addresses, tracks the
//! uplink counters of every node, and answers each upward message fed to it
//! with textual commands: traces for lost messages, invites for join reports,
//! and routing updates after link reports.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::ChannelInfo;
use crate::command::Command;
use crate::correspondence::{lock_register, LossPolicy, SharedCorrespondence};
use crate::directory::{Directory, NodeRecord};
use crate::error::ControllerError;
use crate::payload::{decode_link_report, JoinReport};
use crate::routing::{compute_routes, route_delta, RouteNode, RoutingTable};
use crate::status::NodeStatus;
use crate::wire::{Message, MessageType, MESH_ADDRESS_LIMIT, UNASSIGNED};

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Highest address handed out
    pub address_limit: u8,
    /// Nodes silent for longer are left out of route computation
    pub freshness_window_ms: u64,
    /// Operating channel announced on the rendezvous channel
    pub mesh_channel: ChannelInfo,
    /// Loss reporting of the per-node correspondence registers
    pub loss_policy: LossPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address_limit: MESH_ADDRESS_LIMIT,
            freshness_window_ms: 500_000,
            mesh_channel: ChannelInfo::new("c868100a0907"),
            loss_policy: LossPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_mesh_channel(mut self, channel: ChannelInfo) -> Self {
        self.mesh_channel = channel;
        self
    }

    pub fn with_address_limit(mut self, limit: u8) -> Self {
        self.address_limit = limit.min(MESH_ADDRESS_LIMIT);
        self
    }

    pub fn with_loss_policy(mut self, policy: LossPolicy) -> Self {
        self.loss_policy = policy;
        self
    }

    fn freshness_window(&self) -> Duration {
        Duration::milliseconds(self.freshness_window_ms as i64)
    }
}

/// The routing authority of one mesh
#[derive(Debug, Clone)]
pub struct Controller {
    config: ControllerConfig,
    directory: Directory,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let directory = Directory::new(config.address_limit.min(MESH_ADDRESS_LIMIT), config.loss_policy);
        Self { config, directory }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mesh_channel(&self) -> &ChannelInfo {
        &self.config.mesh_channel
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Address of `identity`; `mediator` is the node that relayed the request
    pub fn allocate_address(&mut self, identity: u64, mediator: Option<u8>) -> Result<u8, ControllerError> {
        self.allocate_address_at(identity, mediator, Utc::now())
    }

    pub fn allocate_address_at(
        &mut self,
        identity: u64,
        mediator: Option<u8>,
        now: DateTime<Utc>,
    ) -> Result<u8, ControllerError> {
        debug!(identity, ?mediator, "Address requested");
        self.directory.allocate(identity, now)
    }

    /// Register shared with the node at `address`
    pub fn correspondence(&self, address: u8) -> Result<SharedCorrespondence, ControllerError> {
        self.directory.correspondence(address)
    }

    /// Uplink counters missing after receiving `message`
    pub fn register_losses(&self, message: &Message) -> Result<Vec<u8>, ControllerError> {
        let register = self.correspondence(message.header.node_address())?;
        let lost = lock_register(&register).register_and_list_losses(message.header);
        Ok(lost)
    }

    /// Process an upward message relayed by the controller node `controller_identity`
    pub fn feed(&mut self, controller_identity: u64, message: &Message) -> Result<Vec<Command>, ControllerError> {
        self.feed_at(controller_identity, message, Utc::now())
    }

    pub fn feed_at(
        &mut self,
        controller_identity: u64,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<Vec<Command>, ControllerError> {
        debug!(%message, "Controller feed");
        let address = message.header.node_address();
        let mut commands = Vec::new();

        if address != UNASSIGNED {
            let counters = self.register_losses(message)?;
            if !counters.is_empty() {
                info!(address, ?counters, "Uplink losses detected");
                commands.push(Command::Trace {
                    target: address,
                    counters,
                });
            }
        }

        if address == UNASSIGNED || message.is(MessageType::Join) {
            let report = JoinReport::decode(&message.payload)?;
            let assigned = self.directory.allocate(report.identity, now)?;
            let target = if address == UNASSIGNED {
                self.directory
                    .by_identity(controller_identity)
                    .map(|record| record.address)
                    .ok_or(ControllerError::UnknownAddress(UNASSIGNED))?
            } else {
                address
            };
            commands.push(Command::Invite {
                target,
                assigned,
                identity: report.identity,
            });
        } else if message.is(MessageType::UpwardsRouting) {
            let links = decode_link_report(&message.payload)?;
            if let Some(keys) = self.update_routing(address, controller_identity, links, now)? {
                commands.push(Command::Update { target: address, keys });
            }
        }

        Ok(commands)
    }

    /// Record a link report and diff the reporter's new routing set
    fn update_routing(
        &mut self,
        address: u8,
        controller_identity: u64,
        links: std::collections::BTreeMap<u8, f64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<u8>>, ControllerError> {
        let record = self
            .directory
            .by_address_mut(address)
            .ok_or(ControllerError::UnknownAddress(address))?;
        record.status = if record.identity == controller_identity {
            NodeStatus::Controller
        } else {
            NodeStatus::Node
        };
        record.last_updated = now;
        record.links = links;

        let table = self.routes_at(now);
        let calculated = table.get(&address).cloned().unwrap_or_default();

        let record = self
            .directory
            .by_address_mut(address)
            .ok_or(ControllerError::UnknownAddress(address))?;
        let delta = route_delta(&record.routing, &calculated);
        record.routing = calculated;

        if delta.is_empty() {
            Ok(None)
        } else {
            info!(address, ?delta, "Routing update");
            Ok(Some(delta))
        }
    }

    /// Routing sets of all live nodes as of `now`
    pub fn routes_at(&self, now: DateTime<Utc>) -> RoutingTable {
        let nodes: Vec<RouteNode> = self
            .directory
            .live(now, self.config.freshness_window())
            .map(NodeRecord::route_node)
            .collect();
        compute_routes(&nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::CorrespondenceRegister;
    use crate::payload::encode_link_report;
    use std::collections::BTreeMap;

    const CONTROLLER: u64 = 1000;

    fn join_report(uplink: &mut CorrespondenceRegister, identity: u64) -> Message {
        uplink.pack_and_increment(MessageType::UpwardsJoin, JoinReport::from_volley(10, 10, identity).encode())
    }

    fn link_report(uplink: &mut CorrespondenceRegister, links: &[(u8, f64)]) -> Message {
        let links: BTreeMap<u8, f64> = links.iter().copied().collect();
        uplink.pack_and_increment(MessageType::UpwardsRouting, encode_link_report(&links))
    }

    #[test]
    fn test_join_report_yields_invite() {
        let mut controller = Controller::new(ControllerConfig::default());
        let root = controller.allocate_address(CONTROLLER, None).unwrap();
        let mut uplink = CorrespondenceRegister::from(root);

        let commands = controller.feed(CONTROLLER, &join_report(&mut uplink, 55)).unwrap();
        assert_eq!(
            commands,
            vec![Command::Invite {
                target: root,
                assigned: 2,
                identity: 55
            }]
        );
        assert_eq!(commands[0].to_string(), "1 invite 2 55");
    }

    #[test]
    fn test_unassigned_join_targets_controller() {
        let mut controller = Controller::new(ControllerConfig::default());
        let root = controller.allocate_address(CONTROLLER, None).unwrap();
        let hello = Message::new(
            crate::wire::Header::encode(MessageType::Hello, UNASSIGNED, 0),
            crate::payload::JoinRequest { identity: 9 }.encode(),
        );

        let commands = controller.feed(CONTROLLER, &hello).unwrap();
        assert_eq!(commands[0].target(), root);
    }

    #[test]
    fn test_losses_yield_trace() {
        let mut controller = Controller::new(ControllerConfig::default());
        let root = controller.allocate_address(CONTROLLER, None).unwrap();
        let mut uplink = CorrespondenceRegister::from(root);

        link_report(&mut uplink, &[]);
        link_report(&mut uplink, &[]);
        let commands = controller.feed(CONTROLLER, &link_report(&mut uplink, &[])).unwrap();
        assert_eq!(
            commands,
            vec![Command::Trace {
                target: root,
                counters: vec![0, 1]
            }]
        );
    }

    #[test]
    fn test_link_reports_yield_updates() {
        let mut controller = Controller::new(ControllerConfig::default());
        let now = Utc::now();
        let root = controller.allocate_address(CONTROLLER, None).unwrap();
        let relay = controller.allocate_address(2000, Some(root)).unwrap();
        let leaf = controller.allocate_address(3000, Some(relay)).unwrap();

        let mut root_up = CorrespondenceRegister::from(root);
        let mut relay_up = CorrespondenceRegister::from(relay);
        let mut leaf_up = CorrespondenceRegister::from(leaf);

        let report = link_report(&mut root_up, &[(relay, 1.0)]);
        assert!(controller.feed_at(CONTROLLER, &report, now).unwrap().is_empty());
        let report = link_report(&mut leaf_up, &[(relay, 1.0)]);
        assert!(controller.feed_at(CONTROLLER, &report, now).unwrap().is_empty());

        let report = link_report(&mut relay_up, &[(root, 1.0), (leaf, 1.0)]);
        let commands = controller.feed_at(CONTROLLER, &report, now).unwrap();
        assert_eq!(
            commands,
            vec![Command::Update {
                target: relay,
                keys: vec![leaf, leaf | crate::wire::DOWNWARDS_KEY]
            }]
        );

        // nothing changed, nothing dispatched
        let report = link_report(&mut relay_up, &[(root, 1.0), (leaf, 1.0)]);
        assert!(controller.feed_at(CONTROLLER, &report, now).unwrap().is_empty());

        let record = controller.directory().by_address(root).unwrap();
        assert_eq!(record.status, NodeStatus::Controller);
        assert_eq!(controller.directory().by_address(relay).unwrap().status, NodeStatus::Node);
    }

    #[test]
    fn test_stale_nodes_are_not_routed() {
        let mut controller = Controller::new(ControllerConfig::default());
        let now = Utc::now();
        let root = controller.allocate_address(CONTROLLER, None).unwrap();
        let relay = controller.allocate_address(2000, None).unwrap();
        let leaf = controller.allocate_address(3000, None).unwrap();

        let mut root_up = CorrespondenceRegister::from(root);
        let mut leaf_up = CorrespondenceRegister::from(leaf);
        let mut relay_up = CorrespondenceRegister::from(relay);

        let long_ago = now - Duration::seconds(1000);
        controller
            .feed_at(CONTROLLER, &link_report(&mut root_up, &[(relay, 1.0)]), long_ago)
            .unwrap();
        controller
            .feed_at(CONTROLLER, &link_report(&mut leaf_up, &[(relay, 1.0)]), now)
            .unwrap();
        let commands = controller
            .feed_at(CONTROLLER, &link_report(&mut relay_up, &[(root, 1.0), (leaf, 1.0)]), now)
            .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_unknown_sender_is_rejected() {
        let mut controller = Controller::new(ControllerConfig::default());
        let mut stranger = CorrespondenceRegister::from(12);
        let result = controller.feed(CONTROLLER, &link_report(&mut stranger, &[]));
        assert_eq!(result, Err(ControllerError::UnknownAddress(12)));
    }
}
