//! Distance-vector routing with split horizon and poisoned reverse.
//!
//! Each node keeps `dst -> (cost, next hop)` learned only from its direct
//! neighbors. One exchange round advertises every node's table to its
//! neighbors; a neighbor adopts the advertised cost plus the edge weight
//! when cheaper. Routes learned *through* a neighbor are advertised back to
//! that neighbor as unreachable (poisoned reverse), which stops two-node
//! count-to-infinity loops.
//!
//! In the absence of churn the tables converge after at most `diameter`
//! rounds. Topology changes prune stale entries immediately; reconvergence
//! then happens on subsequent exchange rounds.

use cloudsim_types::NodeId;
use std::collections::BTreeMap;
use tracing::trace;

/// Advertised cost for an unreachable destination.
const POISON: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DvRoute {
    pub cost: u64,
    pub next_hop: NodeId,
}

/// Per-node distance-vector tables.
#[derive(Debug, Clone, Default)]
pub struct DistanceVectorState {
    /// node -> dst -> route. A node's entry for itself is implicit (cost 0).
    tables: BTreeMap<NodeId, BTreeMap<NodeId, DvRoute>>,
}

impl DistanceVectorState {
    /// Next hop from `node` toward `dst`, if the table has converged one.
    pub fn next_hop(&self, node: NodeId, dst: NodeId) -> Option<NodeId> {
        self.tables
            .get(&node)
            .and_then(|t| t.get(&dst))
            .map(|r| r.next_hop)
    }

    /// Drop entries invalidated by a topology change and reseed direct
    /// neighbors. Called eagerly on every change; exchange rounds do the
    /// rest of the reconvergence.
    pub fn prune(&mut self, edges: &BTreeMap<NodeId, Vec<(NodeId, u64)>>) {
        // Drop tables of departed nodes.
        self.tables.retain(|node, _| edges.contains_key(node));

        for (node, neighbors) in edges {
            let table = self.tables.entry(*node).or_default();
            // Keep only routes that still go through a live neighbor.
            table.retain(|_, route| {
                neighbors.iter().any(|(n, _)| *n == route.next_hop)
            });
            // Reseed direct edges.
            for (neighbor, weight) in neighbors {
                let direct = DvRoute {
                    cost: *weight,
                    next_hop: *neighbor,
                };
                table
                    .entry(*neighbor)
                    .and_modify(|r| {
                        if direct.cost <= r.cost {
                            *r = direct;
                        }
                    })
                    .or_insert(direct);
            }
            // Destinations that vanished from the edge set entirely.
            table.retain(|dst, _| edges.contains_key(dst));
        }
    }

    /// Run one synchronous exchange round: every node advertises its full
    /// table to every neighbor. Returns `true` if any table changed.
    ///
    /// Advertisements are authoritative for routes currently going through
    /// the advertising neighbor: a poisoned or missing destination expires
    /// the route, and a worse cost is adopted rather than ignored.
    pub fn exchange_round(&mut self, edges: &BTreeMap<NodeId, Vec<(NodeId, u64)>>) -> bool {
        let snapshot = self.tables.clone();
        let mut changed = false;

        for (node, neighbors) in edges {
            for (neighbor, weight) in neighbors {
                let Some(advertised) = snapshot.get(neighbor) else {
                    continue;
                };
                let table = self.tables.entry(*node).or_default();

                // Expire routes via this neighbor that it no longer carries.
                let stale: Vec<NodeId> = table
                    .iter()
                    .filter(|(dst, route)| {
                        route.next_hop == *neighbor
                            && **dst != *neighbor
                            && !advertised.contains_key(dst)
                    })
                    .map(|(dst, _)| *dst)
                    .collect();
                for dst in stale {
                    table.remove(&dst);
                    changed = true;
                }

                // The neighbor itself is a destination too.
                let mut offers: Vec<(NodeId, u64)> = vec![(*neighbor, 0)];
                for (dst, route) in advertised {
                    // Split horizon with poisoned reverse: routes the
                    // neighbor learned through us come back poisoned.
                    let cost = if route.next_hop == *node {
                        POISON
                    } else {
                        route.cost
                    };
                    offers.push((*dst, cost));
                }

                for (dst, advertised_cost) in offers {
                    if dst == *node {
                        continue;
                    }
                    if advertised_cost == POISON {
                        if let Some(existing) = table.get(&dst) {
                            if existing.next_hop == *neighbor && dst != *neighbor {
                                table.remove(&dst);
                                changed = true;
                            }
                        }
                        continue;
                    }
                    let candidate = DvRoute {
                        cost: advertised_cost.saturating_add(*weight),
                        next_hop: *neighbor,
                    };
                    let adopt = match table.get(&dst) {
                        None => true,
                        Some(existing) => {
                            candidate.cost < existing.cost
                                || (existing.next_hop == *neighbor
                                    && candidate.cost != existing.cost)
                        }
                    };
                    if adopt {
                        table.insert(dst, candidate);
                        changed = true;
                    }
                }
            }
        }

        if changed {
            trace!("distance-vector round changed tables");
        }
        changed
    }

    /// Run exchange rounds until quiescent, bounded by `max_rounds`.
    /// Returns the number of rounds that changed something.
    pub fn converge(
        &mut self,
        edges: &BTreeMap<NodeId, Vec<(NodeId, u64)>>,
        max_rounds: usize,
    ) -> usize {
        for round in 0..max_rounds {
            if !self.exchange_round(edges) {
                return round;
            }
        }
        max_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: u32) -> BTreeMap<NodeId, Vec<(NodeId, u64)>> {
        let mut edges: BTreeMap<NodeId, Vec<(NodeId, u64)>> = BTreeMap::new();
        for i in 0..n {
            edges.entry(NodeId(i)).or_default();
        }
        for i in 0..n - 1 {
            edges.get_mut(&NodeId(i)).unwrap().push((NodeId(i + 1), 1));
            edges.get_mut(&NodeId(i + 1)).unwrap().push((NodeId(i), 1));
        }
        edges
    }

    #[test]
    fn converges_within_diameter_rounds() {
        let edges = chain(5);
        let mut state = DistanceVectorState::default();
        state.prune(&edges);
        let rounds = state.converge(&edges, 10);
        assert!(rounds <= 4, "chain of 5 should converge in diameter rounds, took {rounds}");
        assert_eq!(state.next_hop(NodeId(0), NodeId(4)), Some(NodeId(1)));
        assert_eq!(state.next_hop(NodeId(3), NodeId(0)), Some(NodeId(2)));
    }

    #[test]
    fn prune_drops_routes_through_dead_neighbor() {
        let mut edges = chain(3);
        let mut state = DistanceVectorState::default();
        state.prune(&edges);
        state.converge(&edges, 10);
        assert_eq!(state.next_hop(NodeId(0), NodeId(2)), Some(NodeId(1)));

        // Cut 1-2.
        edges.get_mut(&NodeId(1)).unwrap().retain(|(n, _)| *n != NodeId(2));
        edges.get_mut(&NodeId(2)).unwrap().retain(|(n, _)| *n != NodeId(1));
        state.prune(&edges);
        state.converge(&edges, 10);
        assert_eq!(
            state.next_hop(NodeId(1), NodeId(2)),
            None,
            "no path may survive to an unreachable destination"
        );
    }

    #[test]
    fn poisoned_reverse_blocks_two_node_loop() {
        // 0-1-2; cut the 1-2 edge after convergence. Without poisoned
        // reverse, 0 would re-advertise its dead route through 1 back to 1.
        let mut edges = chain(3);
        let mut state = DistanceVectorState::default();
        state.prune(&edges);
        state.converge(&edges, 10);

        edges.get_mut(&NodeId(1)).unwrap().retain(|(n, _)| *n != NodeId(2));
        edges.get_mut(&NodeId(2)).unwrap().retain(|(n, _)| *n != NodeId(1));
        state.prune(&edges);
        for _ in 0..6 {
            state.exchange_round(&edges);
        }
        assert_eq!(state.next_hop(NodeId(0), NodeId(2)), None);
        assert_eq!(state.next_hop(NodeId(1), NodeId(2)), None);
    }

    #[test]
    fn reconverges_after_heal() {
        let mut edges = chain(3);
        let mut state = DistanceVectorState::default();
        state.prune(&edges);
        state.converge(&edges, 10);

        edges.get_mut(&NodeId(1)).unwrap().retain(|(n, _)| *n != NodeId(2));
        edges.get_mut(&NodeId(2)).unwrap().retain(|(n, _)| *n != NodeId(1));
        state.prune(&edges);
        state.converge(&edges, 10);

        // Heal the edge.
        edges.get_mut(&NodeId(1)).unwrap().push((NodeId(2), 1));
        edges.get_mut(&NodeId(2)).unwrap().push((NodeId(1), 1));
        state.prune(&edges);
        state.converge(&edges, 10);
        assert_eq!(state.next_hop(NodeId(0), NodeId(2)), Some(NodeId(1)));
    }
}
