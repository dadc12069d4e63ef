//! Link-state routing: all-pairs shortest paths via Dijkstra.

use cloudsim_types::NodeId;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Compute `src -> dst -> next hop` tables over the healthy adjacency.
///
/// Edge weights are latency in nanoseconds. Ties break on node id, so equal
/// topologies always yield equal tables.
pub(crate) fn compute_tables(
    edges: &BTreeMap<NodeId, Vec<(NodeId, u64)>>,
) -> BTreeMap<NodeId, BTreeMap<NodeId, NodeId>> {
    edges
        .keys()
        .map(|src| (*src, single_source(*src, edges)))
        .collect()
}

/// Dijkstra from one source, reduced to a next-hop table.
fn single_source(
    src: NodeId,
    edges: &BTreeMap<NodeId, Vec<(NodeId, u64)>>,
) -> BTreeMap<NodeId, NodeId> {
    let mut dist: BTreeMap<NodeId, u64> = BTreeMap::new();
    let mut prev: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(u64, NodeId)>> = BinaryHeap::new();

    dist.insert(src, 0);
    heap.push(Reverse((0, src)));

    while let Some(Reverse((cost, node))) = heap.pop() {
        if dist.get(&node).copied() != Some(cost) {
            continue; // stale heap entry
        }
        let Some(neighbors) = edges.get(&node) else {
            continue;
        };
        for (neighbor, weight) in neighbors {
            let candidate = cost + weight;
            let better = match dist.get(neighbor) {
                None => true,
                Some(&existing) => {
                    candidate < existing
                        || (candidate == existing && Some(node) < prev.get(neighbor).copied())
                }
            };
            if better {
                dist.insert(*neighbor, candidate);
                prev.insert(*neighbor, node);
                heap.push(Reverse((candidate, *neighbor)));
            }
        }
    }

    // Walk predecessors back to the hop adjacent to src.
    let mut next_hop = BTreeMap::new();
    for dst in dist.keys() {
        if *dst == src {
            continue;
        }
        let mut hop = *dst;
        while let Some(&p) = prev.get(&hop) {
            if p == src {
                break;
            }
            hop = p;
        }
        next_hop.insert(*dst, hop);
    }
    next_hop
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(u32, u32, u64)]) -> BTreeMap<NodeId, Vec<(NodeId, u64)>> {
        let mut map: BTreeMap<NodeId, Vec<(NodeId, u64)>> = BTreeMap::new();
        for (a, b, w) in pairs {
            map.entry(NodeId(*a)).or_default().push((NodeId(*b), *w));
            map.entry(NodeId(*b)).or_default().push((NodeId(*a), *w));
        }
        map
    }

    #[test]
    fn shortest_path_prefers_low_total_weight() {
        // 0-1-2 cost 2, 0-2 direct cost 5.
        let tables = compute_tables(&edges(&[(0, 1, 1), (1, 2, 1), (0, 2, 5)]));
        assert_eq!(tables[&NodeId(0)][&NodeId(2)], NodeId(1));
        assert_eq!(tables[&NodeId(2)][&NodeId(0)], NodeId(1));
    }

    #[test]
    fn equal_cost_ties_break_deterministically() {
        // Two equal-cost paths 0-1-3 and 0-2-3; both runs must agree.
        let e = edges(&[(0, 1, 1), (1, 3, 1), (0, 2, 1), (2, 3, 1)]);
        let first = compute_tables(&e);
        let second = compute_tables(&e);
        assert_eq!(first, second);
        assert_eq!(first[&NodeId(0)][&NodeId(3)], NodeId(1), "lowest id wins ties");
    }

    #[test]
    fn disconnected_nodes_have_no_entry() {
        let mut e = edges(&[(0, 1, 1)]);
        e.insert(NodeId(9), Vec::new());
        let tables = compute_tables(&e);
        assert!(tables[&NodeId(0)].get(&NodeId(9)).is_none());
        assert!(tables[&NodeId(9)].is_empty());
    }
}
