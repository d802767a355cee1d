//! Route computation - all-pairs shortest paths over reported link qualities
//!
//! Every node periodically reports the reception ratio of each neighbour it
//! hears. The reports form a directed graph weighted by `1 / reliability`.
//! Floyd-Warshall with next-hop reconstruction then gives, for every node, the
//! cheapest path up to a controller and back down, and every intermediate hop
//! learns which keys it must forward.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::wire::{DELETE_KEY, DOWNWARDS_KEY};

/// One vertex of the routing graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteNode {
    pub address: u8,
    /// Whether this node has a direct controller link
    #[serde(default)]
    pub controller: bool,
    /// Neighbour address to reception ratio, as reported by this node
    #[serde(default)]
    pub links: BTreeMap<u8, f64>,
}

impl RouteNode {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            controller: false,
            links: BTreeMap::new(),
        }
    }

    pub fn controller(mut self) -> Self {
        self.controller = true;
        self
    }

    pub fn link(mut self, neighbor: u8, reliability: f64) -> Self {
        self.links.insert(neighbor, reliability);
        self
    }
}

/// Routing keys every node must forward, keyed by node address
pub type RoutingTable = BTreeMap<u8, BTreeSet<u8>>;

/// Shortest path distances and next hops between all vertices
struct ShortestPaths {
    distance: Vec<Vec<f64>>,
    next: Vec<Vec<Option<usize>>>,
}

impl ShortestPaths {
    fn compute(nodes: &[RouteNode]) -> Self {
        let size = nodes.len();
        let index: BTreeMap<u8, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.address, i))
            .collect();

        let mut distance = vec![vec![f64::INFINITY; size]; size];
        let mut next = vec![vec![None; size]; size];

        for (i, node) in nodes.iter().enumerate() {
            distance[i][i] = 0.0;
            next[i][i] = Some(i);
            for (neighbor, &reliability) in &node.links {
                let Some(&j) = index.get(neighbor) else {
                    continue;
                };
                if reliability <= 0.0 || i == j {
                    continue;
                }
                let weight = 1.0 / reliability;
                if weight < distance[i][j] {
                    distance[i][j] = weight;
                    next[i][j] = Some(j);
                }
            }
        }

        for k in 0..size {
            for i in 0..size {
                if distance[i][k].is_infinite() {
                    continue;
                }
                for j in 0..size {
                    let through = distance[i][k] + distance[k][j];
                    if through < distance[i][j] {
                        distance[i][j] = through;
                        next[i][j] = next[i][k];
                    }
                }
            }
        }

        Self { distance, next }
    }

    /// Intermediate vertices on the path from `from` to `to`, endpoints excluded
    fn intermediates(&self, from: usize, to: usize) -> Vec<usize> {
        let mut hops = Vec::new();
        let mut current = self.next[from][to];
        while let Some(hop) = current {
            if hop == to || hops.len() > self.next.len() {
                break;
            }
            hops.push(hop);
            current = self.next[hop][to];
        }
        hops
    }

    /// Controller with the cheapest cost under `cost`, first one wins ties
    fn nearest(&self, controllers: &[usize], cost: impl Fn(usize) -> f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for &controller in controllers {
            let candidate = cost(controller);
            if candidate.is_infinite() {
                continue;
            }
            if best.map_or(true, |(_, current)| candidate < current) {
                best = Some((controller, candidate));
            }
        }
        best.map(|(controller, _)| controller)
    }
}

/// Compute the routing keys every node must forward
///
/// For each non-controller node, the intermediate hops of its uplink path to
/// the nearest controller forward its address, and the intermediate hops of
/// the cheapest downlink path from a controller forward its address tagged
/// with the downwards bit. Nodes without a path get no keys.
pub fn compute_routes(nodes: &[RouteNode]) -> RoutingTable {
    let mut table: RoutingTable = nodes.iter().map(|node| (node.address, BTreeSet::new())).collect();

    let controllers: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.controller)
        .map(|(i, _)| i)
        .collect();
    if controllers.is_empty() {
        warn!(nodes = nodes.len(), "No controller among live nodes, routes left empty");
        return table;
    }

    let paths = ShortestPaths::compute(nodes);

    for (u, node) in nodes.iter().enumerate() {
        if node.controller {
            continue;
        }

        if let Some(uplink) = paths.nearest(&controllers, |c| paths.distance[u][c]) {
            for hop in paths.intermediates(u, uplink) {
                table.entry(nodes[hop].address).or_default().insert(node.address);
            }
        }
        if let Some(downlink) = paths.nearest(&controllers, |c| paths.distance[c][u]) {
            for hop in paths.intermediates(downlink, u) {
                table
                    .entry(nodes[hop].address)
                    .or_default()
                    .insert(node.address | DOWNWARDS_KEY);
            }
        }
    }

    table
}

/// Minimal delta turning `previous` into `calculated`
///
/// Additions come first as plain keys, removals follow with the delete bit set.
pub fn route_delta(previous: &BTreeSet<u8>, calculated: &BTreeSet<u8>) -> Vec<u8> {
    calculated
        .difference(previous)
        .copied()
        .chain(previous.difference(calculated).map(|key| key | DELETE_KEY))
        .collect()
}

/// Apply a delta to a routing registry
pub fn apply_delta(registry: &mut BTreeSet<u8>, delta: &[u8]) {
    for &key in delta {
        if key & DELETE_KEY != 0 {
            registry.remove(&(key & !DELETE_KEY));
        } else {
            registry.insert(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u8 = 1;
    const B: u8 = 2;
    const C: u8 = 3;
    const D: u8 = 4;

    fn line() -> Vec<RouteNode> {
        vec![
            RouteNode::new(A).link(B, 1.0),
            RouteNode::new(B).link(A, 1.0).link(C, 1.0),
            RouteNode::new(C).link(B, 1.0).link(D, 1.0),
            RouteNode::new(D).controller().link(C, 1.0),
        ]
    }

    #[test]
    fn test_line_uplink_hops() {
        let table = compute_routes(&line());

        assert!(table[&B].contains(&A));
        assert!(table[&C].contains(&A));
        assert!(!table[&D].contains(&A));
        assert!(!table[&A].contains(&A));
    }

    #[test]
    fn test_line_downlink_hops() {
        let table = compute_routes(&line());

        assert!(table[&B].contains(&(A | DOWNWARDS_KEY)));
        assert!(table[&C].contains(&(A | DOWNWARDS_KEY)));
        assert!(table[&C].contains(&(B | DOWNWARDS_KEY)));
        // C is adjacent to the controller, nobody forwards for it
        assert!(table.values().all(|keys| !keys.contains(&C)));
        assert_eq!(table[&A].len(), 0);
    }

    #[test]
    fn test_prefers_reliable_detour() {
        // A hears D poorly, the detour over B costs 2.0 against 1/0.1
        let nodes = vec![
            RouteNode::new(A).link(D, 0.1).link(B, 1.0),
            RouteNode::new(B).link(A, 1.0).link(D, 1.0),
            RouteNode::new(D).controller().link(A, 0.1).link(B, 1.0),
        ];
        let table = compute_routes(&nodes);
        assert_eq!(table[&B], BTreeSet::from([A, A | DOWNWARDS_KEY]));
    }

    #[test]
    fn test_nearest_controller_is_chosen() {
        let nodes = vec![
            RouteNode::new(A).controller().link(B, 1.0),
            RouteNode::new(B).link(A, 1.0).link(C, 1.0),
            RouteNode::new(C).link(B, 1.0).link(D, 1.0),
            RouteNode::new(D).controller().link(C, 1.0),
        ];
        let table = compute_routes(&nodes);
        assert!(table.values().all(|keys| keys.is_empty()));
    }

    #[test]
    fn test_unreachable_and_controllerless() {
        let nodes = vec![RouteNode::new(A).link(B, 1.0), RouteNode::new(B).link(A, 1.0)];
        assert!(compute_routes(&nodes).values().all(|keys| keys.is_empty()));

        let nodes = vec![
            RouteNode::new(A).controller(),
            RouteNode::new(B).link(C, 1.0),
            RouteNode::new(C).link(B, 1.0).link(9, 1.0),
        ];
        assert!(compute_routes(&nodes).values().all(|keys| keys.is_empty()));
    }

    #[test]
    fn test_delta_is_minimal() {
        let previous = BTreeSet::from([A, B]);
        let calculated = BTreeSet::from([B, C]);
        let delta = route_delta(&previous, &calculated);
        assert_eq!(delta, vec![C, A | DELETE_KEY]);

        let mut registry = previous.clone();
        apply_delta(&mut registry, &delta);
        assert_eq!(registry, calculated);
        assert!(route_delta(&calculated, &calculated).is_empty());
    }

    #[test]
    fn test_route_nodes_from_json() {
        let json = r#"[
            {"address": 1, "controller": true, "links": {"2": 0.9}},
            {"address": 2, "links": {"1": 0.8, "3": 0.7}},
            {"address": 3, "links": {"2": 1.0}}
        ]"#;
        let nodes: Vec<RouteNode> = serde_json::from_str(json).unwrap();
        assert!(nodes[0].controller);
        assert!(!nodes[1].controller);

        let table = compute_routes(&nodes);
        assert_eq!(table[&2], BTreeSet::from([3, 3 | DOWNWARDS_KEY]));
    }
}
