//! Storage node: disk + OS + identity.

use crate::disk::{DiskConfig, VirtualDisk};
use crate::os::{OsConfig, VirtualOs};
use cloudsim_types::{NodeId, NodeIp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::info;

/// Construction parameters for a storage node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub storage_bytes: u64,
    /// NIC line rate in bits per second.
    pub bandwidth_bps: u64,
    pub cpu_cores: u32,
    pub ram_bytes: u64,
    /// Parallel transmissions the NIC sustains.
    pub nic_concurrency: usize,
    pub cpu_time_slice: Duration,
    pub disk: DiskConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_bytes: 50_000_000_000,
            bandwidth_bps: 1_000_000_000,
            cpu_cores: 8,
            ram_bytes: 32_000_000_000,
            nic_concurrency: 4,
            cpu_time_slice: Duration::from_millis(1),
            disk: DiskConfig::default(),
        }
    }
}

/// Data-plane counters kept per node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePerfCounters {
    pub requests_processed: u64,
    pub bytes_transferred: u64,
    pub failed_transfers: u64,
}

/// A storage node in the fabric.
///
/// Composes the virtual disk and OS and carries identity and placement.
/// Link adjacency lives in the routing fabric; replica topology in the
/// cluster manager's maps mirrored here for inspection.
#[derive(Debug, Clone)]
pub struct StorageNode {
    pub id: NodeId,
    pub name: String,
    pub zone: String,
    pub ip: NodeIp,
    pub nic_bandwidth_bps: u64,
    online: bool,
    pub disk: VirtualDisk,
    pub os: VirtualOs,
    pub cluster_root: NodeId,
    pub replica_parent: Option<NodeId>,
    pub replica_children: BTreeSet<NodeId>,
    pub counters: NodePerfCounters,
    /// Bits per second granted to this node's flows on the last tick.
    pub nic_allocated_bps: f64,
    config: NodeConfig,
}

impl StorageNode {
    pub fn new(id: NodeId, name: String, zone: String, ip: NodeIp, config: NodeConfig) -> Self {
        let os = VirtualOs::new(OsConfig {
            cpu_cores: config.cpu_cores,
            ram_capacity: config.ram_bytes,
            cpu_time_slice: config.cpu_time_slice,
            nic_concurrency: config.nic_concurrency,
            ..OsConfig::default()
        });
        info!(%id, name, zone, %ip, "node created");
        Self {
            id,
            name,
            zone,
            ip,
            nic_bandwidth_bps: config.bandwidth_bps,
            online: true,
            disk: VirtualDisk::new(config.storage_bytes, config.disk),
            os,
            cluster_root: id,
            replica_parent: None,
            replica_children: BTreeSet::new(),
            counters: NodePerfCounters::default(),
            nic_allocated_bps: 0.0,
            config,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Take the node offline: the disk rejects new tickets and every live
    /// process dies. Committed data survives for a later restore.
    pub fn fail(&mut self) -> usize {
        self.online = false;
        self.disk.set_online(false);
        self.nic_allocated_bps = 0.0;
        self.os.kill_all()
    }

    /// Bring the node back online with a fresh kernel state.
    pub fn restore(&mut self) {
        self.online = true;
        self.disk.set_online(true);
    }

    /// Construction parameters, used when spawning a replica sibling.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ── Utilization, watched by demand scaling ───────────────────────

    pub fn storage_utilization(&self) -> f64 {
        self.disk.utilization()
    }

    pub fn nic_utilization(&self) -> f64 {
        if self.nic_bandwidth_bps == 0 {
            return 0.0;
        }
        (self.nic_allocated_bps / self.nic_bandwidth_bps as f64).min(1.0)
    }

    pub fn ram_utilization(&self) -> f64 {
        self.os.ram_utilization()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsim_types::FileId;

    fn node() -> StorageNode {
        StorageNode::new(
            NodeId(0),
            "alpha".into(),
            "us-east-1a".into(),
            NodeIp::from_index(0),
            NodeConfig {
                storage_bytes: 1_000,
                ..NodeConfig::default()
            },
        )
    }

    #[test]
    fn fail_kills_processes_and_offlines_disk() {
        let mut n = node();
        n.os
            .syscall(crate::os::SyscallKind::NetworkSend, 100)
            .unwrap();
        let dropped = n.fail();
        assert_eq!(dropped, 1);
        assert!(!n.is_online());
        assert!(!n.disk.is_online());

        n.restore();
        assert!(n.is_online());
        assert!(n.disk.is_online());
    }

    #[test]
    fn storage_utilization_counts_reservations() {
        let mut n = node();
        n.disk.reserve(&FileId::from("f"), 850).unwrap();
        assert!(n.storage_utilization() > 0.84);
    }
}
