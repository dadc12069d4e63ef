//! Routing fabric for CloudSim.
//!
//! Owns the link arena and the adjacency view of the node graph, allocates
//! deterministic `10.0.x.y` addresses as nodes join, and answers route
//! queries under either of two strategies:
//!
//! - **link-state**: all-pairs Dijkstra next-hop tables, recomputed eagerly
//!   on every topology change;
//! - **distance-vector**: per-node tables converged by periodic neighbor
//!   exchanges, with split horizon and poisoned reverse.
//!
//! Both strategies weight edges by `latency_ms`; the weight metric is a
//! cluster-wide constant, never mixed.
//!
//! Failed links and offline nodes are elided from the healthy view, so route
//! queries transparently avoid them once tables have been recomputed (or, for
//! distance-vector, once enough exchange rounds have run).

mod distance_vector;
mod fabric;
mod link_state;

pub use distance_vector::DistanceVectorState;
pub use fabric::{Link, RouteTables, RoutingFabric, RoutingStrategy};
