//! Replica clusters: fan-out on completed writes, link auto-wiring, and
//! demand-driven scaling.
//!
//! Every node belongs to exactly one cluster (its own, until it joins or is
//! spawned into another). A completed user write on any member schedules
//! replica transfers to every other healthy member, so the write survives
//! any single-member failure. Writes landing on a non-root member backfill
//! the root and siblings the same way.
//!
//! Scaling is decentralized: the periodic check walks nodes in id order and
//! any node over a sustained threshold spawns a sibling for itself. A node
//! spawns at most once per threshold breach; the latch clears when the
//! metric drops back under its threshold.

use crate::controller::Controller;
use crate::transfer::TransferKind;
use cloudsim_sim::EventKind;
use cloudsim_node::SyscallKind;
use cloudsim_types::{FileId, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Which threshold fired a spawn. Evaluated in this order; the first breach
/// wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnReason {
    /// Cluster below the configured replication factor (auto-replication).
    Coverage,
    Storage,
    Bandwidth,
    OsFailures,
    Memory,
}

impl SpawnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpawnReason::Coverage => "coverage",
            SpawnReason::Storage => "storage",
            SpawnReason::Bandwidth => "bandwidth",
            SpawnReason::OsFailures => "os_failures",
            SpawnReason::Memory => "memory",
        }
    }
}

/// Replica-cluster membership, keyed by root.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    /// root -> members (root included).
    pub(crate) members: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pub(crate) root_of: BTreeMap<NodeId, NodeId>,
    /// Spawn latch per cluster: holds the reason of the last spawn until a
    /// member's metric recovers. Stops one sustained breach from cascading
    /// into a spawn per check (the fresh replica inherits the data, and with
    /// it the pressure).
    pub(crate) spawn_latch: BTreeMap<NodeId, SpawnReason>,
    /// Name suffix counter per parent.
    pub(crate) replica_serial: BTreeMap<NodeId, u32>,
}

impl ClusterState {
    /// Register a node into a cluster (its own when `root` is `None`).
    pub(crate) fn join(&mut self, node: NodeId, root: Option<NodeId>) -> NodeId {
        let root = root
            .map(|r| self.root_of.get(&r).copied().unwrap_or(r))
            .unwrap_or(node);
        self.members.entry(root).or_default().insert(node);
        self.root_of.insert(node, root);
        root
    }

    pub(crate) fn remove(&mut self, node: NodeId) {
        let Some(root) = self.root_of.remove(&node) else {
            return;
        };
        if root == node {
            self.spawn_latch.remove(&root);
        }
        self.replica_serial.remove(&node);
        let Some(members) = self.members.get_mut(&root) else {
            return;
        };
        members.remove(&node);
        if members.is_empty() {
            self.members.remove(&root);
            return;
        }
        if root == node {
            // Root left: the lowest surviving member takes over.
            let members = self.members.remove(&root).expect("checked non-empty");
            let new_root = *members.iter().next().expect("non-empty");
            for m in &members {
                self.root_of.insert(*m, new_root);
            }
            self.members.insert(new_root, members);
        }
    }

    /// Members of the cluster containing `node`, including `node`.
    pub(crate) fn members_of(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.root_of
            .get(&node)
            .and_then(|root| self.members.get(root))
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([node]))
    }

    pub(crate) fn root_of(&self, node: NodeId) -> Option<NodeId> {
        self.root_of.get(&node).copied()
    }

    pub(crate) fn cluster_size(&self, node: NodeId) -> usize {
        self.members_of(node).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_follows_roots_transitively() {
        let mut state = ClusterState::default();
        let root = state.join(NodeId(0), None);
        assert_eq!(root, NodeId(0));
        state.join(NodeId(1), Some(NodeId(0)));
        // Joining "via" a non-root member still lands in the root's cluster.
        state.join(NodeId(2), Some(NodeId(1)));
        assert_eq!(
            state.members_of(NodeId(2)),
            BTreeSet::from([NodeId(0), NodeId(1), NodeId(2)])
        );
        assert_eq!(state.root_of(NodeId(2)), Some(NodeId(0)));
    }

    #[test]
    fn removing_the_root_promotes_the_lowest_member() {
        let mut state = ClusterState::default();
        state.join(NodeId(0), None);
        state.join(NodeId(1), Some(NodeId(0)));
        state.join(NodeId(2), Some(NodeId(0)));
        state.remove(NodeId(0));
        assert_eq!(state.root_of(NodeId(2)), Some(NodeId(1)));
        assert_eq!(
            state.members_of(NodeId(1)),
            BTreeSet::from([NodeId(1), NodeId(2)])
        );
    }

    #[test]
    fn lone_nodes_are_their_own_cluster() {
        let mut state = ClusterState::default();
        state.join(NodeId(7), None);
        assert_eq!(state.cluster_size(NodeId(7)), 1);
        state.remove(NodeId(7));
        assert_eq!(state.members_of(NodeId(7)), BTreeSet::from([NodeId(7)]));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Cluster manager logic
// ═══════════════════════════════════════════════════════════════════════

impl Controller {
    /// A user write completed on `member`: schedule replica transfers to
    /// every other healthy member. Sync failures are logged and surfaced but
    /// never roll back the primary.
    pub(crate) fn fan_out_completed_write(&mut self, member: NodeId, file: FileId, size: u64) {
        let siblings: Vec<NodeId> = self
            .clusters
            .members_of(member)
            .into_iter()
            .filter(|m| *m != member)
            .collect();
        for sibling in siblings {
            let healthy = self
                .nodes
                .get(&sibling)
                .map(|n| n.is_online())
                .unwrap_or(false);
            if !healthy {
                continue;
            }
            let already_has = self
                .nodes
                .get(&sibling)
                .map(|n| n.disk.has_complete_file(&file))
                .unwrap_or(false);
            if already_has {
                continue;
            }
            debug!(%member, %sibling, %file, "replica fan-out");
            if let Err(err) =
                self.start_transfer(member, sibling, file.clone(), size, None, TransferKind::Replica)
            {
                self.counters.replica_syncs_failed += 1;
                cloudsim_metrics::record_replica_sync_failed();
                let (from, to) = (self.node_name(member), self.node_name(sibling));
                self.emit(
                    EventKind::ReplicaSyncFailed,
                    from,
                    Some(to),
                    vec![
                        ("file".into(), file.to_string()),
                        ("code".into(), err.code().into()),
                    ],
                );
            }
        }
    }

    /// Mirror a fresh link onto cluster siblings so a dataset stays
    /// reachable when one member fails.
    pub(crate) fn auto_wire_clusters(
        &mut self,
        a: NodeId,
        b: NodeId,
        bandwidth_bps: u64,
        latency: std::time::Duration,
    ) {
        let mut mirrors: Vec<(NodeId, NodeId)> = Vec::new();
        for m in self.clusters.members_of(a) {
            if m != a && m != b {
                mirrors.push((m, b));
            }
        }
        for m in self.clusters.members_of(b) {
            if m != b && m != a {
                mirrors.push((m, a));
            }
        }
        for (x, y) in mirrors {
            if self.fabric.healthy_link_between(x, y).is_some() {
                continue;
            }
            // Already linked but down, or never linked; only add when absent.
            if self.fabric.add_link(x, y, bandwidth_bps, latency).is_ok() {
                let (xn, yn) = (self.node_name(x), self.node_name(y));
                self.emit(
                    EventKind::LinkAdded,
                    xn,
                    Some(yn),
                    vec![("mirrored".into(), "true".into())],
                );
            }
        }
    }

    // ── Demand-driven scaling ────────────────────────────────────────

    /// Periodic scaling check across all nodes in id order.
    pub(crate) fn on_scaling_check(&mut self) {
        self.scaling_armed = false;
        if !self.config.scaling.enabled {
            return;
        }
        let node_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        let mut spawned_any = false;
        for node in node_ids {
            if let Some(reason) = self.evaluate_scaling(node) {
                self.spawn_replica(node, reason);
                spawned_any = true;
            }
        }
        // Keep checking while clusters are still below their target size.
        let coverage_pending = self.config.scaling.auto_replication
            && self
                .clusters
                .members
                .values()
                .any(|m| m.len() < self.config.scaling.replication_factor);
        if spawned_any || coverage_pending {
            self.ensure_scaling_check();
        }
    }

    /// Decide whether `node` should spawn a sibling, and why.
    ///
    /// Thresholds are evaluated in a fixed order (coverage, storage,
    /// bandwidth, OS failures, RAM) so concurrent breaches resolve
    /// deterministically. A node that already spawned for a reason stays
    /// latched until that metric recovers.
    fn evaluate_scaling(&mut self, node: NodeId) -> Option<SpawnReason> {
        let cfg = self.config.scaling;
        let (storage, bandwidth, ram, online) = {
            let n = self.nodes.get(&node)?;
            (
                n.storage_utilization(),
                n.nic_utilization(),
                n.ram_utilization(),
                n.is_online(),
            )
        };
        if !online {
            return None;
        }
        let failures = self
            .nodes
            .get_mut(&node)
            .map(|n| n.os.drain_recent_failures())
            .unwrap_or(0);
        let root = self.clusters.root_of(node).unwrap_or(node);

        // Clear the cluster latch once this member's pressure is gone.
        if let Some(latched) = self.clusters.spawn_latch.get(&root).copied() {
            let recovered = match latched {
                SpawnReason::Coverage => true,
                SpawnReason::Storage => storage <= cfg.storage_threshold,
                SpawnReason::Bandwidth => bandwidth <= cfg.bandwidth_threshold,
                SpawnReason::OsFailures => failures < cfg.os_failure_threshold,
                SpawnReason::Memory => ram <= cfg.os_memory_utilization_threshold,
            };
            if recovered {
                self.clusters.spawn_latch.remove(&root);
            }
        }

        let cluster_size = self.clusters.cluster_size(node);
        if cluster_size >= cfg.max_replicas_per_cluster {
            return None;
        }

        let reason = if cfg.auto_replication && cluster_size < cfg.replication_factor {
            Some(SpawnReason::Coverage)
        } else if storage > cfg.storage_threshold {
            Some(SpawnReason::Storage)
        } else if bandwidth > cfg.bandwidth_threshold {
            Some(SpawnReason::Bandwidth)
        } else if failures >= cfg.os_failure_threshold {
            Some(SpawnReason::OsFailures)
        } else if ram > cfg.os_memory_utilization_threshold {
            Some(SpawnReason::Memory)
        } else {
            None
        }?;

        if reason != SpawnReason::Coverage
            && self.clusters.spawn_latch.get(&root) == Some(&reason)
        {
            return None;
        }
        Some(reason)
    }

    /// Spawn a sibling replica of `parent`: clone its resources, mirror its
    /// links, join its cluster, and backfill its committed files.
    pub(crate) fn spawn_replica(&mut self, parent: NodeId, reason: SpawnReason) {
        let serial = {
            let s = self.clusters.replica_serial.entry(parent).or_insert(0);
            *s += 1;
            *s
        };
        let (parent_name, parent_zone, parent_config) = {
            let p = self.nodes.get(&parent).expect("evaluated above");
            (p.name.clone(), p.zone.clone(), p.config().clone())
        };
        let name = format!("{parent_name}-r{serial}");
        let root = self.clusters.root_of(parent);

        let child = match self.create_node(&name, parent_zone, parent_config, root) {
            Ok(id) => id,
            Err(err) => {
                debug!(%parent, code = err.code(), "replica spawn rejected");
                return;
            }
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.replica_children.insert(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.replica_parent = Some(parent);
        }

        // Inherit the parent's connections, then link to the parent itself.
        let parent_links: Vec<(NodeId, u64, std::time::Duration)> = self
            .fabric
            .neighbors(parent)
            .filter_map(|(neighbor, link_id)| {
                self.fabric
                    .link(link_id)
                    .map(|l| (neighbor, l.bandwidth_bps, l.latency))
            })
            .collect();
        for (neighbor, bw, latency) in parent_links {
            if neighbor != child {
                let _ = self.fabric.add_link(child, neighbor, bw, latency);
            }
        }
        let parent_nic = self
            .nodes
            .get(&parent)
            .map(|n| n.nic_bandwidth_bps)
            .unwrap_or(1_000_000_000);
        let _ = self
            .fabric
            .add_link(child, parent, parent_nic, std::time::Duration::from_micros(500));
        self.emit_route_recomputed();

        // The parent pays kernel time for the wiring work.
        if let Some(p) = self.nodes.get_mut(&parent) {
            if let Ok(pid) = p.os.syscall(SyscallKind::MaintenanceHook, 0) {
                self.maintenance_pids.insert((parent, pid));
                self.ensure_os_tick(parent);
            }
        }

        let latch_root = self.clusters.root_of(parent).unwrap_or(parent);
        self.clusters.spawn_latch.insert(latch_root, reason);
        self.counters.replicas_spawned += 1;
        cloudsim_metrics::record_replica_spawned();
        let child_name = self.node_name(child);
        self.emit(
            EventKind::ReplicaSpawned,
            parent_name.clone(),
            Some(child_name.clone()),
            vec![("reason".into(), reason.as_str().into())],
        );
        info!(parent = parent_name, child = child_name, reason = reason.as_str(), "replica spawned");

        // Backfill every committed file so the new sibling is a real replica.
        let files: Vec<(FileId, u64)> = self
            .nodes
            .get(&parent)
            .map(|p| {
                p.disk
                    .files()
                    .filter(|(_, total, committed)| total == committed)
                    .map(|(f, total, _)| (f.clone(), total))
                    .collect()
            })
            .unwrap_or_default();
        for (file, size) in files {
            if let Err(err) =
                self.start_transfer(parent, child, file.clone(), size, None, TransferKind::Replica)
            {
                self.counters.replica_syncs_failed += 1;
                cloudsim_metrics::record_replica_sync_failed();
                let (from, to) = (self.node_name(parent), self.node_name(child));
                self.emit(
                    EventKind::ReplicaSyncFailed,
                    from,
                    Some(to),
                    vec![
                        ("file".into(), file.to_string()),
                        ("code".into(), err.code().into()),
                    ],
                );
            }
        }
    }
}
