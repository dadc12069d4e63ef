//! Link arena, adjacency, and route queries.

use crate::distance_vector::DistanceVectorState;
use crate::link_state;
use cloudsim_types::{LinkId, NodeId, NodeIp, SimError};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

/// An undirected edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: LinkId,
    pub a: NodeId,
    pub b: NodeId,
    /// Line rate in bits per second.
    pub bandwidth_bps: u64,
    pub latency: Duration,
    pub up: bool,
}

impl Link {
    /// The endpoint that is not `node`.
    pub fn other(&self, node: NodeId) -> NodeId {
        if node == self.a {
            self.b
        } else {
            self.a
        }
    }

    pub fn connects(&self, x: NodeId, y: NodeId) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// Route computation strategy. The choice is fabric-wide and fixed at
/// construction; both weight edges by latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Recompute all-pairs next-hop tables on every topology change.
    LinkState,
    /// Converge tables through periodic neighbor exchanges.
    DistanceVector,
}

/// Computed routing state for the active strategy.
#[derive(Debug, Clone)]
pub enum RouteTables {
    /// `src -> dst -> next hop`.
    LinkState(BTreeMap<NodeId, BTreeMap<NodeId, NodeId>>),
    DistanceVector(DistanceVectorState),
}

/// The routing fabric: IP allocation, links, and route queries.
#[derive(Debug, Clone)]
pub struct RoutingFabric {
    strategy: RoutingStrategy,
    links: BTreeMap<LinkId, Link>,
    /// node -> neighbor -> link. Kept symmetric.
    adjacency: BTreeMap<NodeId, BTreeMap<NodeId, LinkId>>,
    offline: BTreeSet<NodeId>,
    ips: BTreeMap<NodeId, NodeIp>,
    next_link: u32,
    next_ip_index: u32,
    tables: RouteTables,
    recomputes: u64,
}

impl RoutingFabric {
    pub fn new(strategy: RoutingStrategy) -> Self {
        let tables = match strategy {
            RoutingStrategy::LinkState => RouteTables::LinkState(BTreeMap::new()),
            RoutingStrategy::DistanceVector => {
                RouteTables::DistanceVector(DistanceVectorState::default())
            }
        };
        Self {
            strategy,
            links: BTreeMap::new(),
            adjacency: BTreeMap::new(),
            offline: BTreeSet::new(),
            ips: BTreeMap::new(),
            next_link: 0,
            next_ip_index: 0,
            tables,
            recomputes: 0,
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Times the tables have been recomputed (link-state) or pruned for
    /// reconvergence (distance-vector).
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Add a node to the fabric, allocating its address.
    pub fn register_node(&mut self, node: NodeId) -> NodeIp {
        let ip = NodeIp::from_index(self.next_ip_index);
        self.next_ip_index += 1;
        self.ips.insert(node, ip);
        self.adjacency.entry(node).or_default();
        self.on_topology_change();
        debug!(%node, %ip, "registered");
        ip
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, node: NodeId) {
        let neighbors: Vec<NodeId> = self
            .adjacency
            .remove(&node)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        for neighbor in neighbors {
            if let Some(edges) = self.adjacency.get_mut(&neighbor) {
                if let Some(link) = edges.remove(&node) {
                    self.links.remove(&link);
                }
            }
        }
        self.offline.remove(&node);
        self.ips.remove(&node);
        self.on_topology_change();
    }

    pub fn ip_of(&self, node: NodeId) -> Option<NodeIp> {
        self.ips.get(&node).copied()
    }

    /// Re-register a node under its previously allocated address (snapshot
    /// restore). Does not advance the allocator.
    pub fn register_node_with_ip(&mut self, node: NodeId, ip: NodeIp) {
        self.ips.insert(node, ip);
        self.adjacency.entry(node).or_default();
        self.on_topology_change();
    }

    /// Next address allocator position, captured by snapshots.
    pub fn next_ip_index(&self) -> u32 {
        self.next_ip_index
    }

    pub fn set_next_ip_index(&mut self, index: u32) {
        self.next_ip_index = index;
    }

    /// Mark a node online/offline; offline nodes are elided from routing.
    pub fn set_node_online(&mut self, node: NodeId, online: bool) {
        let changed = if online {
            self.offline.remove(&node)
        } else {
            self.offline.insert(node)
        };
        if changed {
            self.on_topology_change();
        }
    }

    // ── Links ────────────────────────────────────────────────────────

    pub fn add_link(
        &mut self,
        a: NodeId,
        b: NodeId,
        bandwidth_bps: u64,
        latency: Duration,
    ) -> Result<LinkId, SimError> {
        if a == b {
            return Err(SimError::InvalidArgument("cannot link a node to itself".into()));
        }
        if !self.adjacency.contains_key(&a) || !self.adjacency.contains_key(&b) {
            return Err(SimError::InvalidArgument(format!(
                "both endpoints must be registered before linking {a} and {b}"
            )));
        }
        if self.adjacency[&a].contains_key(&b) {
            return Err(SimError::InvalidArgument(format!(
                "link between {a} and {b} already exists"
            )));
        }
        if bandwidth_bps == 0 {
            return Err(SimError::InvalidArgument("link bandwidth must be positive".into()));
        }

        self.next_link += 1;
        let id = LinkId(self.next_link);
        self.links.insert(
            id,
            Link {
                id,
                a,
                b,
                bandwidth_bps,
                latency,
                up: true,
            },
        );
        self.adjacency.get_mut(&a).expect("checked above").insert(b, id);
        self.adjacency.get_mut(&b).expect("checked above").insert(a, id);
        self.on_topology_change();
        info!(
            %id, %a, %b,
            bandwidth = %cloudsim_types::format_bandwidth(bandwidth_bps),
            ?latency,
            "link added"
        );
        Ok(id)
    }

    /// Remove a link entirely (administrative disconnect).
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) -> Result<LinkId, SimError> {
        let id = self.link_id_between(a, b)?;
        self.links.remove(&id);
        if let Some(edges) = self.adjacency.get_mut(&a) {
            edges.remove(&b);
        }
        if let Some(edges) = self.adjacency.get_mut(&b) {
            edges.remove(&a);
        }
        self.on_topology_change();
        Ok(id)
    }

    /// Fault-inject a link down.
    pub fn fail_link(&mut self, a: NodeId, b: NodeId) -> Result<LinkId, SimError> {
        let id = self.link_id_between(a, b)?;
        let link = self.links.get_mut(&id).expect("indexed via adjacency");
        if link.up {
            link.up = false;
            self.on_topology_change();
        }
        Ok(id)
    }

    pub fn restore_link(&mut self, a: NodeId, b: NodeId) -> Result<LinkId, SimError> {
        let id = self.link_id_between(a, b)?;
        let link = self.links.get_mut(&id).expect("indexed via adjacency");
        if !link.up {
            link.up = true;
            self.on_topology_change();
        }
        Ok(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// The link between two nodes if it exists, is up, and both endpoints
    /// are online. This is the view the transfer engine registers flows on.
    pub fn healthy_link_between(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        let id = self.adjacency.get(&a)?.get(&b)?;
        let link = self.links.get(id)?;
        if link.up && !self.offline.contains(&a) && !self.offline.contains(&b) {
            Some(link)
        } else {
            None
        }
    }

    /// Every neighbor with the connecting link id, regardless of health.
    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = (NodeId, LinkId)> + '_ {
        self.adjacency
            .get(&node)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(n, l)| (*n, *l)))
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Full hop sequence from `src` to `dst`, including both endpoints.
    pub fn get_route(&self, src: NodeId, dst: NodeId) -> Result<Vec<NodeId>, SimError> {
        if self.offline.contains(&src) || self.offline.contains(&dst) {
            return Err(SimError::NoRoute { src, dst });
        }
        if src == dst {
            return Ok(vec![src]);
        }
        let max_hops = self.adjacency.len() + 1;
        let mut route = vec![src];
        let mut current = src;
        while current != dst {
            if route.len() > max_hops {
                return Err(SimError::NoRoute { src, dst });
            }
            let next = match &self.tables {
                RouteTables::LinkState(tables) => tables
                    .get(&current)
                    .and_then(|t| t.get(&dst))
                    .copied(),
                RouteTables::DistanceVector(state) => state.next_hop(current, dst),
            };
            let Some(next) = next else {
                return Err(SimError::NoRoute { src, dst });
            };
            // A computed next hop can still be stale under distance-vector;
            // refuse to route over anything unhealthy.
            if self.healthy_link_between(current, next).is_none() {
                return Err(SimError::NoRoute { src, dst });
            }
            route.push(next);
            current = next;
        }
        Ok(route)
    }

    /// Run one distance-vector exchange round. Returns `true` if any table
    /// changed (i.e. convergence is still in progress).
    pub fn dv_exchange_round(&mut self) -> bool {
        let edges = self.healthy_edges();
        match &mut self.tables {
            RouteTables::DistanceVector(state) => state.exchange_round(&edges),
            RouteTables::LinkState(_) => false,
        }
    }

    /// Adjacency restricted to healthy links and online nodes, weighted by
    /// latency in nanoseconds.
    pub fn healthy_edges(&self) -> BTreeMap<NodeId, Vec<(NodeId, u64)>> {
        let mut edges: BTreeMap<NodeId, Vec<(NodeId, u64)>> = BTreeMap::new();
        for node in self.adjacency.keys() {
            if self.offline.contains(node) {
                continue;
            }
            let mut out = Vec::new();
            for (neighbor, link_id) in &self.adjacency[node] {
                if self.offline.contains(neighbor) {
                    continue;
                }
                let link = &self.links[link_id];
                if !link.up {
                    continue;
                }
                // Zero-latency links still need a positive weight so path
                // length stays the tiebreaker.
                let weight = (link.latency.as_nanos() as u64).max(1);
                out.push((*neighbor, weight));
            }
            edges.insert(*node, out);
        }
        edges
    }

    // ── Internals ────────────────────────────────────────────────────

    fn link_id_between(&self, a: NodeId, b: NodeId) -> Result<LinkId, SimError> {
        self.adjacency
            .get(&a)
            .and_then(|edges| edges.get(&b))
            .copied()
            .ok_or_else(|| SimError::InvalidArgument(format!("no link between {a} and {b}")))
    }

    fn on_topology_change(&mut self) {
        let edges = self.healthy_edges();
        self.recomputes += 1;
        match &mut self.tables {
            RouteTables::LinkState(tables) => {
                *tables = link_state::compute_tables(&edges);
                cloudsim_metrics::record_route_recompute();
            }
            RouteTables::DistanceVector(state) => {
                state.prune(&edges);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric_with_chain(n: u32) -> RoutingFabric {
        let mut fabric = RoutingFabric::new(RoutingStrategy::LinkState);
        for i in 0..n {
            fabric.register_node(NodeId(i));
        }
        for i in 0..n - 1 {
            fabric
                .add_link(
                    NodeId(i),
                    NodeId(i + 1),
                    1_000_000_000,
                    Duration::from_millis(10),
                )
                .unwrap();
        }
        fabric
    }

    #[test]
    fn routes_follow_the_chain() {
        let fabric = fabric_with_chain(4);
        let route = fabric.get_route(NodeId(0), NodeId(3)).unwrap();
        assert_eq!(route, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(fabric.get_route(NodeId(2), NodeId(2)).unwrap(), vec![NodeId(2)]);
    }

    #[test]
    fn failed_link_breaks_and_restore_heals() {
        let mut fabric = fabric_with_chain(3);
        fabric.fail_link(NodeId(1), NodeId(2)).unwrap();
        assert_eq!(
            fabric.get_route(NodeId(0), NodeId(2)).unwrap_err().code(),
            "no_route"
        );
        fabric.restore_link(NodeId(1), NodeId(2)).unwrap();
        assert!(fabric.get_route(NodeId(0), NodeId(2)).is_ok());
    }

    #[test]
    fn offline_node_is_elided() {
        let mut fabric = fabric_with_chain(3);
        // Alternate path around node 1.
        fabric
            .add_link(NodeId(0), NodeId(2), 1_000_000_000, Duration::from_millis(50))
            .unwrap();
        fabric.set_node_online(NodeId(1), false);
        let route = fabric.get_route(NodeId(0), NodeId(2)).unwrap();
        assert_eq!(route, vec![NodeId(0), NodeId(2)]);
    }

    #[test]
    fn lower_latency_path_wins() {
        let mut fabric = RoutingFabric::new(RoutingStrategy::LinkState);
        for i in 0..4 {
            fabric.register_node(NodeId(i));
        }
        // 0-1-3 at 2ms/hop vs direct 0-3 at 10ms.
        fabric
            .add_link(NodeId(0), NodeId(1), 1_000, Duration::from_millis(2))
            .unwrap();
        fabric
            .add_link(NodeId(1), NodeId(3), 1_000, Duration::from_millis(2))
            .unwrap();
        fabric
            .add_link(NodeId(0), NodeId(3), 1_000, Duration::from_millis(10))
            .unwrap();
        let route = fabric.get_route(NodeId(0), NodeId(3)).unwrap();
        assert_eq!(route, vec![NodeId(0), NodeId(1), NodeId(3)]);
    }

    #[test]
    fn duplicate_links_are_rejected() {
        let mut fabric = fabric_with_chain(2);
        let err = fabric
            .add_link(NodeId(1), NodeId(0), 1_000, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn ips_allocate_in_join_order() {
        let fabric = fabric_with_chain(3);
        assert_eq!(fabric.ip_of(NodeId(0)).unwrap().to_string(), "10.0.0.1");
        assert_eq!(fabric.ip_of(NodeId(2)).unwrap().to_string(), "10.0.0.3");
    }
}
