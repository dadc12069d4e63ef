//! The controller: the thin public surface consumed by shells, scenario
//! runners, and control-plane wrappers.
//!
//! The controller owns every arena (nodes, links, transfers, clusters), the
//! scheduler, and the event log. All simulator progress flows through
//! [`Controller::step`] / [`Controller::run_until_idle`], which pop events
//! off the scheduler and dispatch them; nothing else advances time. Multiple
//! independent controllers can coexist in one process.

use crate::cluster::ClusterState;
use crate::config::SimConfig;
use crate::telemetry::{StepReport, TelemetryCounters, TelemetrySnapshot};
use crate::transfer::{TransferKind, TransferTable};
use cloudsim_network::{RoutingFabric, RoutingStrategy};
use cloudsim_node::{DeviceKind, NodeConfig, NodePerfCounters, StorageNode, SubmitOutcome};
use cloudsim_sim::{EventKind, EventLog, EventRecord, Scheduler, SimEvent};
use cloudsim_types::{
    zone_region, Checksum, ChunkId, FileId, NodeId, Pid, SimError, TransferId, ZONE_CATALOG,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════
// Public views
// ═══════════════════════════════════════════════════════════════════════

/// Optional parameters for `add_node`. Unset fields take defaults.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub storage_bytes: Option<u64>,
    pub bandwidth_bps: Option<u64>,
    pub cpu_cores: Option<u32>,
    pub ram_bytes: Option<u64>,
    pub nic_concurrency: Option<usize>,
    pub zone: Option<String>,
    /// Join this node's cluster instead of forming a singleton one.
    pub cluster_root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub ip: String,
    pub zone: String,
    pub storage_bytes: u64,
    pub bandwidth_bps: u64,
    pub cpu_cores: u32,
    pub ram_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkInfo {
    pub a: String,
    pub b: String,
    pub bandwidth_bps: u64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFileInfo {
    pub file: String,
    pub size_bytes: u64,
    pub committed_bytes: u64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageInfo {
    pub storage_total: u64,
    pub storage_used: u64,
    pub storage_reserved: u64,
    pub storage_utilization: f64,
    pub ram_used: u64,
    pub ram_utilization: f64,
    pub nic_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsReport {
    pub syscalls: u64,
    pub process_failures: u64,
    pub oom_denials: u64,
    pub disk_inflight: usize,
    pub nic_inflight: usize,
    pub nic_blocked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferView {
    pub id: u64,
    pub kind: &'static str,
    pub src: String,
    pub dst: String,
    pub file: String,
    pub size: u64,
    pub state: &'static str,
    pub chunks: usize,
    pub committed_chunks: usize,
    pub created_at_secs: f64,
    pub completed_at_secs: Option<f64>,
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub online: bool,
    pub zone: String,
    pub ip: String,
    pub bandwidth_bps: u64,
    pub cluster_root: String,
    pub replica_parent: Option<String>,
    pub replica_children: Vec<String>,
    pub neighbors: Vec<String>,
    pub stored_files: Vec<StoredFileInfo>,
    pub active_transfers: Vec<TransferView>,
    pub usage: UsageInfo,
    pub perf: NodePerfCounters,
    pub os: OsReport,
}

// ═══════════════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════════════

/// One independent simulator instance.
pub struct Controller {
    pub(crate) config: SimConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) nodes: BTreeMap<NodeId, StorageNode>,
    pub(crate) names: BTreeMap<String, NodeId>,
    pub(crate) next_node_index: u32,
    pub(crate) fabric: RoutingFabric,
    pub(crate) transfers: TransferTable,
    pub(crate) clusters: ClusterState,
    pub(crate) event_log: EventLog,
    pub(crate) counters: TelemetryCounters,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) next_transfer: u64,
    pub(crate) network_tick_armed: bool,
    pub(crate) os_tick_armed: BTreeSet<NodeId>,
    pub(crate) dv_armed: bool,
    pub(crate) scaling_armed: bool,
    pub(crate) maintenance_pids: BTreeSet<(NodeId, Pid)>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Controller {
    pub fn new(config: SimConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let fabric = RoutingFabric::new(config.routing_strategy);
        let event_log = EventLog::new(config.event_log_capacity);
        info!(seed = config.seed, strategy = ?config.routing_strategy, "controller created");
        Self {
            scheduler: Scheduler::new(),
            nodes: BTreeMap::new(),
            names: BTreeMap::new(),
            next_node_index: 0,
            fabric,
            transfers: TransferTable::default(),
            clusters: ClusterState::default(),
            event_log,
            counters: TelemetryCounters::default(),
            rng,
            next_transfer: 0,
            network_tick_armed: false,
            os_tick_armed: BTreeSet::new(),
            dv_armed: false,
            scaling_armed: false,
            maintenance_pids: BTreeSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now_secs(&self) -> f64 {
        self.scheduler.now().as_secs_f64()
    }

    // ── Node lifecycle ───────────────────────────────────────────────

    pub fn add_node(&mut self, name: Option<&str>, opts: NodeOptions) -> Result<NodeInfo, SimError> {
        let name = match name {
            Some(n) if n.trim().is_empty() => {
                return Err(SimError::InvalidArgument("node name cannot be empty".into()))
            }
            Some(n) => n.to_string(),
            None => loop {
                let candidate = format!("node-{}", self.next_node_index);
                if !self.names.contains_key(&candidate) {
                    break candidate;
                }
                self.next_node_index += 1;
            },
        };

        let defaults = NodeConfig::default();
        let config = NodeConfig {
            storage_bytes: opts.storage_bytes.unwrap_or(defaults.storage_bytes),
            bandwidth_bps: opts.bandwidth_bps.unwrap_or(defaults.bandwidth_bps),
            cpu_cores: opts.cpu_cores.unwrap_or(defaults.cpu_cores),
            ram_bytes: opts.ram_bytes.unwrap_or(defaults.ram_bytes),
            nic_concurrency: opts.nic_concurrency.unwrap_or(defaults.nic_concurrency),
            ..defaults
        };
        let zone = match opts.zone {
            Some(z) => z,
            None => ZONE_CATALOG[self.rng.gen_range(0..ZONE_CATALOG.len())].to_string(),
        };
        let root = match &opts.cluster_root {
            Some(r) => Some(self.resolve(r)?),
            None => None,
        };

        let id = self.create_node(&name, zone, config, root)?;
        self.emit(EventKind::NodeAdded, name.clone(), None, vec![]);
        self.ensure_scaling_check();

        let node = &self.nodes[&id];
        Ok(NodeInfo {
            name,
            ip: node.ip.to_string(),
            zone: node.zone.clone(),
            storage_bytes: node.disk.capacity(),
            bandwidth_bps: node.nic_bandwidth_bps,
            cpu_cores: node.config().cpu_cores,
            ram_bytes: node.config().ram_bytes,
        })
    }

    /// Shared node construction for `add_node` and replica spawning.
    pub(crate) fn create_node(
        &mut self,
        name: &str,
        zone: String,
        config: NodeConfig,
        cluster_root: Option<NodeId>,
    ) -> Result<NodeId, SimError> {
        if self.names.contains_key(name) {
            return Err(SimError::DuplicateNode(name.to_string()));
        }
        let id = NodeId(self.next_node_index);
        self.next_node_index += 1;
        let ip = self.fabric.register_node(id);
        let node = StorageNode::new(id, name.to_string(), zone, ip, config);
        self.nodes.insert(id, node);
        self.names.insert(name.to_string(), id);
        let root = self.clusters.join(id, cluster_root);
        self.nodes.get_mut(&id).expect("just inserted").cluster_root = root;
        Ok(id)
    }

    pub fn remove_node(&mut self, name: &str) -> Result<(), SimError> {
        let id = self.resolve(name)?;

        // Active work touching the node dies with it.
        let affected: Vec<TransferId> = self
            .transfers
            .transfers
            .values()
            .filter(|t| !t.state.is_terminal() && (t.src == id || t.dst == id))
            .map(|t| t.id)
            .collect();
        for tid in affected {
            self.fail_transfer(tid, SimError::NodeOffline(id));
        }

        // Unlink replica topology.
        let (parent, children) = {
            let n = &self.nodes[&id];
            (n.replica_parent, n.replica_children.clone())
        };
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.replica_children.remove(&id);
        }
        for child in children {
            if let Some(c) = self.nodes.get_mut(&child) {
                c.replica_parent = None;
            }
        }
        self.clusters.remove(id);
        // Root reassignment may have moved members under a new root.
        let reassigned: Vec<(NodeId, NodeId)> = self
            .nodes
            .keys()
            .filter(|n| **n != id)
            .filter_map(|n| self.clusters.root_of(*n).map(|root| (*n, root)))
            .collect();
        for (node, root) in reassigned {
            if let Some(n) = self.nodes.get_mut(&node) {
                n.cluster_root = root;
            }
        }

        self.fabric.remove_node(id);
        self.names.remove(name);
        self.nodes.remove(&id);
        self.os_tick_armed.remove(&id);

        self.emit(EventKind::NodeRemoved, name.to_string(), None, vec![]);
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        self.reroute_active_transfers();
        Ok(())
    }

    pub fn fail_node(&mut self, name: &str) -> Result<(), SimError> {
        let id = self.resolve(name)?;
        let node = self.nodes.get_mut(&id).expect("resolved");
        if !node.is_online() {
            return Ok(());
        }
        let dropped = node.fail();
        let orphaned_tickets = node.disk.drop_pending();
        for ticket in orphaned_tickets {
            if let Some(ctx) = self.transfers.ticket_index.remove(&(id, ticket)) {
                self.scheduler.cancel(ctx.event);
            }
        }
        // Tracked processes on this node are gone.
        self.transfers.pid_index.retain(|(n, _), _| *n != id);
        self.maintenance_pids.retain(|(n, _)| *n != id);

        self.fabric.set_node_online(id, false);
        self.emit(
            EventKind::NodeFailed,
            name.to_string(),
            None,
            vec![("dropped_processes".into(), dropped.to_string())],
        );
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        self.reroute_active_transfers();
        Ok(())
    }

    pub fn restore_node(&mut self, name: &str) -> Result<(), SimError> {
        let id = self.resolve(name)?;
        let node = self.nodes.get_mut(&id).expect("resolved");
        if node.is_online() {
            return Ok(());
        }
        node.restore();
        self.fabric.set_node_online(id, true);
        self.emit(EventKind::NodeRestored, name.to_string(), None, vec![]);
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        Ok(())
    }

    // ── Link lifecycle ───────────────────────────────────────────────

    /// Connect a chain of nodes pairwise. Bandwidth and latency apply to
    /// every created link; when unset, each pair draws a profile from the
    /// zone distance between its endpoints.
    pub fn connect(
        &mut self,
        names: &[&str],
        bandwidth_bps: Option<u64>,
        latency: Option<Duration>,
    ) -> Result<Vec<LinkInfo>, SimError> {
        if names.len() < 2 {
            return Err(SimError::InvalidArgument(
                "connect needs at least two nodes".into(),
            ));
        }
        let mut created = Vec::new();
        for pair in names.windows(2) {
            let (a, b) = (self.resolve(pair[0])?, self.resolve(pair[1])?);
            let (bw, lat) = match (bandwidth_bps, latency) {
                (Some(bw), Some(lat)) => (bw, lat),
                _ => {
                    let (auto_bw, auto_lat) = self.auto_link_profile(a, b);
                    (bandwidth_bps.unwrap_or(auto_bw), latency.unwrap_or(auto_lat))
                }
            };
            self.fabric.add_link(a, b, bw, lat)?;
            self.emit(
                EventKind::LinkAdded,
                pair[0].to_string(),
                Some(pair[1].to_string()),
                vec![
                    ("bandwidth_bps".into(), bw.to_string()),
                    ("latency_ms".into(), format!("{:.3}", lat.as_secs_f64() * 1e3)),
                ],
            );
            created.push(LinkInfo {
                a: pair[0].to_string(),
                b: pair[1].to_string(),
                bandwidth_bps: bw,
                latency_ms: lat.as_secs_f64() * 1e3,
            });
            self.auto_wire_clusters(a, b, bw, lat);
        }
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        Ok(created)
    }

    /// Remove a link outright (administrative, not a fault).
    pub fn disconnect(&mut self, a: &str, b: &str) -> Result<(), SimError> {
        let (ia, ib) = (self.resolve(a)?, self.resolve(b)?);
        self.fabric.remove_link(ia, ib)?;
        self.emit(
            EventKind::LinkRemoved,
            a.to_string(),
            Some(b.to_string()),
            vec![],
        );
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        self.reroute_active_transfers();
        Ok(())
    }

    pub fn fail_link(&mut self, a: &str, b: &str) -> Result<(), SimError> {
        let (ia, ib) = (self.resolve(a)?, self.resolve(b)?);
        self.fabric.fail_link(ia, ib)?;
        self.emit(
            EventKind::LinkFailed,
            a.to_string(),
            Some(b.to_string()),
            vec![],
        );
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        self.reroute_active_transfers();
        Ok(())
    }

    pub fn restore_link(&mut self, a: &str, b: &str) -> Result<(), SimError> {
        let (ia, ib) = (self.resolve(a)?, self.resolve(b)?);
        self.fabric.restore_link(ia, ib)?;
        self.emit(
            EventKind::LinkRestored,
            a.to_string(),
            Some(b.to_string()),
            vec![],
        );
        self.emit_route_recomputed();
        self.ensure_dv_exchange();
        Ok(())
    }

    // ── Transfers ────────────────────────────────────────────────────

    pub fn initiate_file_transfer(
        &mut self,
        src: &str,
        dst: &str,
        file: &str,
        size: u64,
        chunk_size: Option<u64>,
    ) -> Result<TransferId, SimError> {
        let (s, d) = (self.resolve(src)?, self.resolve(dst)?);
        self.start_transfer(s, d, FileId::new(file), size, chunk_size, TransferKind::User)
    }

    /// Copy an already-stored file from `owner` to `target` through both
    /// nodes' virtual OS layers.
    pub fn initiate_replica_transfer(
        &mut self,
        owner: &str,
        target: &str,
        file: &str,
    ) -> Result<TransferId, SimError> {
        let (o, t) = (self.resolve(owner)?, self.resolve(target)?);
        if o == t {
            return Err(SimError::InvalidArgument(
                "replica source and target must differ".into(),
            ));
        }
        let file_id = FileId::new(file);
        let size = self
            .nodes
            .get(&o)
            .filter(|n| n.disk.has_complete_file(&file_id))
            .and_then(|n| {
                n.disk
                    .files()
                    .find(|(f, _, _)| **f == file_id)
                    .map(|(_, total, _)| total)
            })
            .ok_or_else(|| {
                SimError::InvalidArgument(format!("'{file}' is not fully stored on {owner}"))
            })?;
        self.start_transfer(o, t, file_id, size, None, TransferKind::Replica)
    }

    /// Store a file into the fabric from `src`. Picks the node with the most
    /// free capacity (or `src` itself with `local`), then transfers.
    pub fn push(
        &mut self,
        src: &str,
        file: &str,
        size: u64,
        local: bool,
    ) -> Result<(String, TransferId), SimError> {
        let s = self.resolve(src)?;
        let target = if local { s } else { self.best_push_target(s, size)? };
        let id = self.start_transfer(s, target, FileId::new(file), size, None, TransferKind::User)?;
        Ok((self.node_name(target), id))
    }

    /// Materialize a stored file on `target`. Returns `None` when the file
    /// is already local.
    pub fn fetch(&mut self, target: &str, file: &str) -> Result<Option<TransferId>, SimError> {
        let t = self.resolve(target)?;
        let file_id = FileId::new(file);
        if self
            .nodes
            .get(&t)
            .map(|n| n.disk.has_complete_file(&file_id))
            .unwrap_or(false)
        {
            return Ok(None);
        }
        let owners: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.id != t && n.is_online() && n.disk.has_complete_file(&file_id))
            .map(|n| n.id)
            .collect();
        if owners.is_empty() {
            return Err(SimError::InvalidArgument(format!(
                "no stored copy of '{file}' found"
            )));
        }
        let mut last_err = None;
        for owner in owners {
            let size = self.nodes[&owner]
                .disk
                .files()
                .find(|(f, _, _)| **f == file_id)
                .map(|(_, total, _)| total)
                .unwrap_or(0);
            match self.start_transfer(
                owner,
                t,
                file_id.clone(),
                size,
                None,
                TransferKind::Replica,
            ) {
                Ok(id) => return Ok(Some(id)),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.expect("owners was non-empty"))
    }

    /// Cancel an in-flight transfer, releasing its destination reservation.
    pub fn abort(&mut self, id: TransferId) -> Result<(), SimError> {
        self.abort_transfer(id)
    }

    // ── Fault injection ──────────────────────────────────────────────

    pub fn inject_corruption(&mut self, node: &str, file: &str, chunk: u32) -> Result<(), SimError> {
        let id = self.resolve(node)?;
        let file_id = FileId::new(file);
        self.nodes
            .get_mut(&id)
            .expect("resolved")
            .disk
            .inject_corruption(&file_id, ChunkId(chunk))?;
        self.emit(
            EventKind::CorruptionInjected,
            node.to_string(),
            None,
            vec![
                ("file".into(), file.to_string()),
                ("chunk".into(), chunk.to_string()),
            ],
        );
        Ok(())
    }

    /// Replace a corrupt chunk record with a trusted checksum, preferring a
    /// clean copy held by a cluster sibling.
    pub fn recover_chunk(&mut self, node: &str, file: &str, chunk: u32) -> Result<(), SimError> {
        let id = self.resolve(node)?;
        let file_id = FileId::new(file);
        let chunk_id = ChunkId(chunk);

        let trusted = self
            .clusters
            .members_of(id)
            .into_iter()
            .filter(|m| *m != id)
            .chain(self.nodes.keys().copied().filter(|m| *m != id))
            .find_map(|m| {
                self.nodes.get(&m).and_then(|n| {
                    n.disk
                        .chunk_record(&file_id, chunk_id)
                        .filter(|r| !r.corrupt)
                        .map(|r| r.checksum)
                })
            })
            .unwrap_or_else(|| Checksum::for_chunk(file, chunk));

        self.nodes
            .get_mut(&id)
            .expect("resolved")
            .disk
            .recover_chunk(&file_id, chunk_id, trusted)?;
        self.emit(
            EventKind::ChunkRecovered,
            node.to_string(),
            None,
            vec![
                ("file".into(), file.to_string()),
                ("chunk".into(), chunk.to_string()),
            ],
        );
        Ok(())
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Advance the simulation by `seconds` of simulated time.
    pub fn step(&mut self, seconds: f64) -> Result<StepReport, SimError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "step duration must be non-negative, got {seconds}"
            )));
        }
        let until = self.scheduler.now().as_secs_f64() + seconds;
        self.run(Some(until), None)
    }

    /// Run until the queue drains, `until_secs` (absolute simulated time) is
    /// reached, or `max_events` have been dispatched — whichever comes
    /// first. With a time bound and no cap hit, the clock lands exactly on
    /// the bound.
    pub fn run(
        &mut self,
        until_secs: Option<f64>,
        max_events: Option<u64>,
    ) -> Result<StepReport, SimError> {
        let start = self.scheduler.now();
        let bound = match until_secs {
            Some(s) if !s.is_finite() || s < 0.0 => {
                return Err(SimError::InvalidArgument(format!(
                    "run bound must be a non-negative time, got {s}"
                )));
            }
            Some(s) => {
                let b = Duration::from_secs_f64(s);
                if b < start {
                    return Err(SimError::InvalidArgument(format!(
                        "run bound {s} lies before the current time"
                    )));
                }
                Some(b)
            }
            None => None,
        };

        let before = self.scheduler.events_processed();
        let cap = max_events.unwrap_or(u64::MAX);
        let mut processed = 0u64;
        while processed < cap {
            let Some((_, event)) = self.scheduler.pop_next(bound) else {
                break;
            };
            self.dispatch(event);
            processed += 1;
        }
        // Only a fully drained window may fast-forward; an event-cap stop
        // leaves the clock on the last dispatched event.
        if processed < cap {
            if let Some(b) = bound {
                self.scheduler.fast_forward(b);
            }
        }
        Ok(StepReport {
            duration_secs: (self.scheduler.now() - start).as_secs_f64(),
            events_processed: self.scheduler.events_processed() - before,
            now_secs: self.now_secs(),
        })
    }

    /// Drain the event queue completely.
    pub fn run_until_idle(&mut self) -> StepReport {
        self.run(None, None)
            .expect("unbounded run takes no invalid arguments")
    }

    fn dispatch(&mut self, event: SimEvent) {
        match event {
            SimEvent::NetworkTick => self.on_network_tick(),
            SimEvent::OsTick { node } => self.on_os_tick(node),
            SimEvent::DvExchange => self.on_dv_exchange(),
            SimEvent::ScalingCheck => self.on_scaling_check(),
            SimEvent::DiskIoComplete { node, ticket } => self.on_disk_io_complete(node, ticket),
            SimEvent::ChunkArrived {
                transfer,
                chunk,
                from,
                to,
            } => self.on_chunk_arrived(transfer, chunk, from, to),
        }
    }

    fn on_dv_exchange(&mut self) {
        self.dv_armed = false;
        if self.fabric.strategy() != RoutingStrategy::DistanceVector {
            return;
        }
        let changed = self.fabric.dv_exchange_round();
        if changed {
            self.emit(EventKind::RouteRecomputed, "fabric".to_string(), None, vec![]);
            self.ensure_dv_exchange();
            // New reachability may unblock queued chunks.
            self.reroute_active_transfers();
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn inspect(&self, name: &str) -> Result<NodeReport, SimError> {
        let id = self.resolve(name)?;
        let node = &self.nodes[&id];

        let stored_files = node
            .disk
            .files()
            .map(|(f, total, committed)| StoredFileInfo {
                file: f.to_string(),
                size_bytes: total,
                committed_bytes: committed,
                complete: committed == total,
            })
            .collect();
        let active_transfers = self
            .transfers
            .iter()
            .filter(|t| !t.state.is_terminal() && (t.src == id || t.dst == id))
            .map(|t| self.view_of(t))
            .collect();
        let neighbors = self
            .fabric
            .neighbors(id)
            .map(|(n, _)| self.node_name(n))
            .collect();

        Ok(NodeReport {
            name: name.to_string(),
            online: node.is_online(),
            zone: node.zone.clone(),
            ip: node.ip.to_string(),
            bandwidth_bps: node.nic_bandwidth_bps,
            cluster_root: self.node_name(node.cluster_root),
            replica_parent: node.replica_parent.map(|p| self.node_name(p)),
            replica_children: node.replica_children.iter().map(|c| self.node_name(*c)).collect(),
            neighbors,
            stored_files,
            active_transfers,
            usage: UsageInfo {
                storage_total: node.disk.capacity(),
                storage_used: node.disk.committed_bytes(),
                storage_reserved: node.disk.reserved_bytes(),
                storage_utilization: node.storage_utilization(),
                ram_used: node.os.ram_used(),
                ram_utilization: node.ram_utilization(),
                nic_utilization: node.nic_utilization(),
            },
            perf: node.counters,
            os: OsReport {
                syscalls: node.os.syscall_count(),
                process_failures: node.os.failure_count(),
                oom_denials: node.os.oom_denials(),
                disk_inflight: node.os.device_inflight(DeviceKind::Disk),
                nic_inflight: node.os.device_inflight(DeviceKind::Nic),
                nic_blocked: node.os.device_blocked(DeviceKind::Nic),
            },
        })
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        let (mut total_storage, mut used, mut reserved, mut total_bw, mut os_failures) =
            (0u64, 0u64, 0u64, 0u64, 0u64);
        let mut online = 0usize;
        for node in self.nodes.values() {
            total_storage += node.disk.capacity();
            used += node.disk.committed_bytes();
            reserved += node.disk.reserved_bytes();
            total_bw += node.nic_bandwidth_bps;
            os_failures += node.os.failure_count();
            if node.is_online() {
                online += 1;
            }
        }
        TelemetrySnapshot {
            now_secs: self.now_secs(),
            events_processed: self.scheduler.events_processed(),
            node_count: self.nodes.len(),
            online_node_count: online,
            link_count: self.fabric.links().count(),
            active_transfers: self
                .transfers
                .iter()
                .filter(|t| !t.state.is_terminal())
                .count(),
            total_storage_bytes: total_storage,
            used_storage_bytes: used,
            reserved_storage_bytes: reserved,
            total_bandwidth_bps: total_bw,
            os_process_failures: os_failures,
            route_recomputes: self.fabric.recompute_count(),
            counters: self.counters,
        }
    }

    /// Most recent `tail` event log entries, oldest first.
    pub fn events(&self, tail: usize) -> Vec<EventRecord> {
        self.event_log.tail(tail)
    }

    pub fn transfer_view(&self, id: TransferId) -> Option<TransferView> {
        self.transfers.get(id).map(|t| self.view_of(t))
    }

    /// Names of nodes holding a complete copy of `file`.
    pub fn locate_file(&self, file: &str) -> Vec<String> {
        let file_id = FileId::new(file);
        self.nodes
            .values()
            .filter(|n| n.disk.has_complete_file(&file_id))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Cluster membership as `root name -> member names`.
    pub fn clusters(&self) -> BTreeMap<String, Vec<String>> {
        self.clusters
            .members
            .iter()
            .map(|(root, members)| {
                (
                    self.node_name(*root),
                    members.iter().map(|m| self.node_name(*m)).collect(),
                )
            })
            .collect()
    }

    // ── Shared internals ─────────────────────────────────────────────

    pub(crate) fn resolve(&self, name: &str) -> Result<NodeId, SimError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    pub(crate) fn node_name(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn emit(
        &mut self,
        kind: EventKind,
        actor: String,
        target: Option<String>,
        fields: Vec<(String, String)>,
    ) {
        self.event_log
            .push(self.scheduler.now(), kind, actor, target, fields);
    }

    pub(crate) fn emit_route_recomputed(&mut self) {
        if self.fabric.strategy() == RoutingStrategy::LinkState {
            self.emit(EventKind::RouteRecomputed, "fabric".to_string(), None, vec![]);
        }
    }

    pub(crate) fn ensure_network_tick(&mut self) {
        if !self.network_tick_armed {
            self.network_tick_armed = true;
            let tick = self.config.tick_interval;
            self.scheduler
                .schedule_in(tick, SimEvent::NetworkTick)
                .expect("delay is non-negative");
        }
    }

    pub(crate) fn ensure_os_tick(&mut self, node: NodeId) {
        if self.os_tick_armed.insert(node) {
            let slice = self
                .nodes
                .get(&node)
                .map(|n| n.os.config().cpu_time_slice)
                .unwrap_or(Duration::from_millis(1));
            self.scheduler
                .schedule_in(slice, SimEvent::OsTick { node })
                .expect("delay is non-negative");
        }
    }

    pub(crate) fn ensure_dv_exchange(&mut self) {
        if self.fabric.strategy() == RoutingStrategy::DistanceVector && !self.dv_armed {
            self.dv_armed = true;
            let interval = self.config.dv_interval;
            self.scheduler
                .schedule_in(interval, SimEvent::DvExchange)
                .expect("delay is non-negative");
        }
    }

    pub(crate) fn ensure_scaling_check(&mut self) {
        if self.config.scaling.enabled && !self.scaling_armed {
            self.scaling_armed = true;
            let interval = self.config.scaling_interval;
            self.scheduler
                .schedule_in(interval, SimEvent::ScalingCheck)
                .expect("delay is non-negative");
        }
    }

    /// Maintenance processes are tracked outside the transfer table.
    pub(crate) fn handle_maintenance_cpu_done(&mut self, node: NodeId, pid: Pid) {
        if !self.maintenance_pids.contains(&(node, pid)) {
            return;
        }
        let Some(n) = self.nodes.get_mut(&node) else {
            return;
        };
        match n.os.submit(pid) {
            SubmitOutcome::Started => self.complete_maintenance(node, pid),
            SubmitOutcome::Blocked => {}
        }
    }

    /// Maintenance work is instantaneous once the device admits it.
    pub(crate) fn complete_maintenance(&mut self, node: NodeId, pid: Pid) {
        self.maintenance_pids.remove(&(node, pid));
        let promoted = match self.nodes.get_mut(&node) {
            Some(n) => n.os.complete(pid),
            None => Vec::new(),
        };
        for next in promoted {
            self.on_device_started(node, next);
        }
    }

    fn view_of(&self, t: &crate::transfer::Transfer) -> TransferView {
        TransferView {
            id: t.id.0,
            kind: t.kind.as_str(),
            src: self.node_name(t.src),
            dst: self.node_name(t.dst),
            file: t.file.to_string(),
            size: t.size,
            state: t.state.as_str(),
            chunks: t.chunk_count(),
            committed_chunks: t.committed_chunks(),
            created_at_secs: t.created_at.as_secs_f64(),
            completed_at_secs: t.completed_at.map(|d| d.as_secs_f64()),
            error_code: t.error.as_ref().map(|e| e.code()),
        }
    }

    /// Target with the most free projected capacity for `push`.
    fn best_push_target(&self, src: NodeId, size: u64) -> Result<NodeId, SimError> {
        let mut best: Option<(u64, NodeId)> = None;
        for node in self.nodes.values() {
            if !node.is_online() || node.disk.free_bytes() < size {
                continue;
            }
            if node.id != src && self.fabric.get_route(src, node.id).is_err() {
                continue;
            }
            let free = node.disk.free_bytes();
            let better = match best {
                None => true,
                Some((best_free, best_id)) => {
                    free > best_free || (free == best_free && node.id < best_id)
                }
            };
            if better {
                best = Some((free, node.id));
            }
        }
        best.map(|(_, id)| id).ok_or(SimError::NoSpace {
            needed: size,
            available: self
                .nodes
                .values()
                .map(|n| n.disk.free_bytes())
                .max()
                .unwrap_or(0),
        })
    }

    /// Link profile drawn from zone proximity, the way operators would
    /// provision real sites.
    fn auto_link_profile(&mut self, a: NodeId, b: NodeId) -> (u64, Duration) {
        let zone_a = self.nodes.get(&a).map(|n| n.zone.clone()).unwrap_or_default();
        let zone_b = self.nodes.get(&b).map(|n| n.zone.clone()).unwrap_or_default();
        let (bw_mbps, latency_ms) = if zone_a == zone_b && !zone_a.is_empty() {
            (
                self.rng.gen_range(1800..=2500),
                self.rng.gen_range(0.2..0.8),
            )
        } else if zone_region(&zone_a) == zone_region(&zone_b) && !zone_a.is_empty() {
            (self.rng.gen_range(900..=1600), self.rng.gen_range(2.0..7.0))
        } else {
            (self.rng.gen_range(300..=900), self.rng.gen_range(20.0..80.0))
        };
        debug!(%a, %b, bw_mbps, latency_ms, "auto link profile");
        (
            bw_mbps as u64 * 1_000_000,
            Duration::from_secs_f64(latency_ms / 1e3),
        )
    }
}
