//! Versioned, self-describing state snapshots.
//!
//! A snapshot round-trips nodes (identity, state, usage), links, replica
//! cluster membership, committed disk contents, the event log tail, and the
//! simulator clock. In-flight transfer state is deliberately not preserved:
//! reservations held by live transfers are dropped on capture, so a restored
//! simulator starts quiescent.

use crate::controller::Controller;
use crate::telemetry::TelemetryCounters;
use cloudsim_network::RoutingStrategy;
use cloudsim_node::{ChunkRecord, NodeConfig, NodePerfCounters, StorageNode};
use cloudsim_sim::{EventKind, EventRecord, Scheduler};
use cloudsim_types::{FileId, NodeId, NodeIp, SimError};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FileSnapshot {
    file: String,
    /// Committed bytes only; reservations do not survive a snapshot.
    total_size: u64,
    chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeSnapshot {
    id: u32,
    name: String,
    zone: String,
    ip: NodeIp,
    online: bool,
    storage_bytes: u64,
    bandwidth_bps: u64,
    cpu_cores: u32,
    ram_bytes: u64,
    nic_concurrency: usize,
    cluster_root: u32,
    replica_parent: Option<u32>,
    replica_children: Vec<u32>,
    counters: NodePerfCounters,
    files: Vec<FileSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkSnapshot {
    a: u32,
    b: u32,
    bandwidth_bps: u64,
    latency_ms: f64,
    up: bool,
}

/// The opaque-but-self-describing blob format.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    now_secs: f64,
    seed: u64,
    routing_strategy: String,
    next_node_index: u32,
    next_ip_index: u32,
    next_transfer: u64,
    nodes: Vec<NodeSnapshot>,
    links: Vec<LinkSnapshot>,
    events: Vec<EventRecord>,
    counters: TelemetryCounters,
}

impl Controller {
    /// Capture the durable simulator state as a JSON blob.
    pub fn snapshot(&self) -> Result<Vec<u8>, SimError> {
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let files = node
                    .disk
                    .files()
                    .filter_map(|(file, _, committed)| {
                        if committed == 0 {
                            return None;
                        }
                        let chunks: Vec<ChunkRecord> = node
                            .disk
                            .file_chunks(file)
                            .map(|it| it.cloned().collect())
                            .unwrap_or_default();
                        Some(FileSnapshot {
                            file: file.to_string(),
                            total_size: committed,
                            chunks,
                        })
                    })
                    .collect();
                NodeSnapshot {
                    id: node.id.0,
                    name: node.name.clone(),
                    zone: node.zone.clone(),
                    ip: node.ip,
                    online: node.is_online(),
                    storage_bytes: node.disk.capacity(),
                    bandwidth_bps: node.nic_bandwidth_bps,
                    cpu_cores: node.config().cpu_cores,
                    ram_bytes: node.config().ram_bytes,
                    nic_concurrency: node.config().nic_concurrency,
                    cluster_root: node.cluster_root.0,
                    replica_parent: node.replica_parent.map(|p| p.0),
                    replica_children: node.replica_children.iter().map(|c| c.0).collect(),
                    counters: node.counters,
                    files,
                }
            })
            .collect();

        let links = self
            .fabric
            .links()
            .map(|link| LinkSnapshot {
                a: link.a.0,
                b: link.b.0,
                bandwidth_bps: link.bandwidth_bps,
                latency_ms: link.latency.as_secs_f64() * 1e3,
                up: link.up,
            })
            .collect();

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            now_secs: self.now_secs(),
            seed: self.config.seed,
            routing_strategy: match self.fabric.strategy() {
                RoutingStrategy::LinkState => "link_state".to_string(),
                RoutingStrategy::DistanceVector => "distance_vector".to_string(),
            },
            next_node_index: self.next_node_index,
            next_ip_index: self.fabric.next_ip_index(),
            next_transfer: self.next_transfer,
            nodes,
            links,
            events: self.event_log.tail(self.event_log.capacity()),
            counters: self.counters,
        };
        serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SimError::InvalidArgument(format!("snapshot serialization: {e}")))
    }

    /// Replace the entire simulator state with a previously captured blob.
    pub fn restore(&mut self, blob: &[u8]) -> Result<(), SimError> {
        let snapshot: Snapshot = serde_json::from_slice(blob)
            .map_err(|e| SimError::InvalidArgument(format!("unreadable snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SimError::InvalidArgument(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        // Fresh runtime; the blob is authoritative.
        self.scheduler = Scheduler::new();
        self.scheduler
            .restore_now(Duration::from_secs_f64(snapshot.now_secs.max(0.0)));
        self.nodes.clear();
        self.names.clear();
        self.transfers = Default::default();
        self.clusters = Default::default();
        self.rng = ChaCha8Rng::seed_from_u64(snapshot.seed);
        self.network_tick_armed = false;
        self.os_tick_armed.clear();
        self.dv_armed = false;
        self.scaling_armed = false;
        self.maintenance_pids.clear();
        self.next_node_index = snapshot.next_node_index;
        self.next_transfer = snapshot.next_transfer;
        self.counters = snapshot.counters;
        self.fabric = cloudsim_network::RoutingFabric::new(match snapshot.routing_strategy.as_str()
        {
            "distance_vector" => RoutingStrategy::DistanceVector,
            _ => RoutingStrategy::LinkState,
        });

        // Nodes ascend by id, so cluster roots always precede members.
        let mut node_snapshots = snapshot.nodes;
        node_snapshots.sort_by_key(|n| n.id);
        for ns in &node_snapshots {
            let id = NodeId(ns.id);
            let defaults = NodeConfig::default();
            let config = NodeConfig {
                storage_bytes: ns.storage_bytes,
                bandwidth_bps: ns.bandwidth_bps,
                cpu_cores: ns.cpu_cores,
                ram_bytes: ns.ram_bytes,
                nic_concurrency: ns.nic_concurrency,
                ..defaults
            };
            self.fabric.register_node_with_ip(id, ns.ip);
            let mut node = StorageNode::new(id, ns.name.clone(), ns.zone.clone(), ns.ip, config);
            node.counters = ns.counters;
            node.cluster_root = NodeId(ns.cluster_root);
            node.replica_parent = ns.replica_parent.map(NodeId);
            node.replica_children = ns.replica_children.iter().map(|c| NodeId(*c)).collect();
            for file in &ns.files {
                node.disk.restore_file(
                    FileId::new(file.file.clone()),
                    file.total_size,
                    file.chunks.clone(),
                )?;
            }
            self.nodes.insert(id, node);
            self.names.insert(ns.name.clone(), id);
            let root = NodeId(ns.cluster_root);
            self.clusters
                .join(id, if root == id { None } else { Some(root) });
        }
        self.fabric.set_next_ip_index(snapshot.next_ip_index);

        for ls in &snapshot.links {
            let (a, b) = (NodeId(ls.a), NodeId(ls.b));
            self.fabric.add_link(
                a,
                b,
                ls.bandwidth_bps,
                Duration::from_secs_f64(ls.latency_ms / 1e3),
            )?;
            if !ls.up {
                self.fabric.fail_link(a, b)?;
            }
        }

        // Offline state last, once links exist, so routing sees the truth.
        for ns in &node_snapshots {
            if !ns.online {
                let id = NodeId(ns.id);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.fail();
                }
                self.fabric.set_node_online(id, false);
            }
        }

        self.event_log.restore(snapshot.events);
        self.emit(
            EventKind::SnapshotRestored,
            "controller".to_string(),
            None,
            vec![("version".into(), SNAPSHOT_VERSION.to_string())],
        );
        info!(nodes = node_snapshots.len(), "snapshot restored");
        Ok(())
    }
}
