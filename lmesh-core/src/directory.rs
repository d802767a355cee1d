//! Controller-side directory of mesh nodes

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::correspondence::{CorrespondenceRegister, LossPolicy, SharedCorrespondence};
use crate::error::ControllerError;
use crate::routing::RouteNode;
use crate::status::NodeStatus;

/// Everything the controller knows about one physical node
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    /// Stable identity of the node hardware
    pub identity: u64,
    pub address: u8,
    pub status: NodeStatus,
    pub last_updated: DateTime<Utc>,
    /// Last reported reception ratio per neighbour
    pub links: BTreeMap<u8, f64>,
    /// Routing keys last dispatched to this node
    pub routing: BTreeSet<u8>,
    #[serde(skip)]
    pub correspondence: SharedCorrespondence,
}

impl NodeRecord {
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_updated >= now - window
    }

    pub fn route_node(&self) -> RouteNode {
        RouteNode {
            address: self.address,
            controller: self.status == NodeStatus::Controller,
            links: self.links.clone(),
        }
    }
}

/// Node records indexed by identity and by address
#[derive(Debug, Clone)]
pub struct Directory {
    records: BTreeMap<u64, NodeRecord>,
    addresses: HashMap<u8, u64>,
    address_limit: u8,
    loss_policy: LossPolicy,
}

impl Directory {
    pub fn new(address_limit: u8, loss_policy: LossPolicy) -> Self {
        Self {
            records: BTreeMap::new(),
            addresses: HashMap::new(),
            address_limit,
            loss_policy,
        }
    }

    /// Address of `identity`, allocating the lowest free one on first contact
    pub fn allocate(&mut self, identity: u64, now: DateTime<Utc>) -> Result<u8, ControllerError> {
        if let Some(record) = self.records.get(&identity) {
            info!(identity, address = record.address, "Resolved existing address");
            return Ok(record.address);
        }

        let address = (1..=self.address_limit)
            .find(|candidate| !self.addresses.contains_key(candidate))
            .ok_or(ControllerError::AddressSpaceExhausted(self.address_limit))?;

        let correspondence = CorrespondenceRegister::to(address)
            .with_policy(self.loss_policy)
            .shared();
        self.records.insert(
            identity,
            NodeRecord {
                identity,
                address,
                status: NodeStatus::Joining,
                last_updated: now,
                links: BTreeMap::new(),
                routing: BTreeSet::new(),
                correspondence,
            },
        );
        self.addresses.insert(address, identity);
        info!(identity, address, "Allocated address");
        Ok(address)
    }

    pub fn by_identity(&self, identity: u64) -> Option<&NodeRecord> {
        self.records.get(&identity)
    }

    pub fn by_address(&self, address: u8) -> Option<&NodeRecord> {
        self.addresses
            .get(&address)
            .and_then(|identity| self.records.get(identity))
    }

    pub fn by_address_mut(&mut self, address: u8) -> Option<&mut NodeRecord> {
        let identity = self.addresses.get(&address)?;
        self.records.get_mut(identity)
    }

    pub fn correspondence(&self, address: u8) -> Result<SharedCorrespondence, ControllerError> {
        self.by_address(address)
            .map(|record| record.correspondence.clone())
            .ok_or(ControllerError::UnknownAddress(address))
    }

    /// Records updated within `window` of `now`
    pub fn live(&self, now: DateTime<Utc>, window: Duration) -> impl Iterator<Item = &NodeRecord> {
        self.records.values().filter(move |record| record.is_live(now, window))
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_idempotent() {
        let mut directory = Directory::new(63, LossPolicy::default());
        let now = Utc::now();
        let first = directory.allocate(100, now).unwrap();
        let second = directory.allocate(200, now).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(directory.allocate(100, now).unwrap(), 1);
        assert_eq!(directory.by_address(2).unwrap().identity, 200);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_allocation_exhausts() {
        let mut directory = Directory::new(3, LossPolicy::default());
        let now = Utc::now();
        for identity in 0..3 {
            directory.allocate(identity, now).unwrap();
        }
        assert_eq!(
            directory.allocate(99, now),
            Err(ControllerError::AddressSpaceExhausted(3))
        );
        assert_eq!(directory.allocate(2, now), Ok(3));
    }

    #[test]
    fn test_live_window() {
        let mut directory = Directory::new(63, LossPolicy::default());
        let now = Utc::now();
        directory.allocate(1, now - Duration::seconds(600)).unwrap();
        directory.allocate(2, now - Duration::seconds(10)).unwrap();

        let live: Vec<u64> = directory
            .live(now, Duration::seconds(500))
            .map(|record| record.identity)
            .collect();
        assert_eq!(live, vec![2]);
    }

    #[test]
    fn test_correspondence_is_downward() {
        let mut directory = Directory::new(63, LossPolicy::default());
        let address = directory.allocate(7, Utc::now()).unwrap();
        let register = directory.correspondence(address).unwrap();
        assert!(crate::correspondence::lock_register(&register)
            .pack(crate::wire::MessageType::DownwardsRouting, vec![])
            .header
            .is_downwards());
        assert!(matches!(directory.correspondence(40), Err(ControllerError::UnknownAddress(40))));
    }
}
