//! Chunked multi-hop transfers with per-link fair bandwidth sharing.
//!
//! A transfer splits its file into chunks and walks them along the route
//! resolved at initiation. Movement is table-driven: every time a chunk is
//! ready to leave a node it asks the fabric for the current next hop, which
//! is what makes failover a re-query instead of a special case.
//!
//! Within one transfer, at most one chunk transmits out of a given node at a
//! time (chunks of the same transfer serialize per hop, but pipeline across
//! consecutive hops). A link's capacity is therefore divided per transfer:
//! each `NetworkTick`, every flow on a link receives `capacity · tick / K`
//! bytes where `K` is the number of concurrent flows.
//!
//! Every hop passes through the sender's virtual OS (`network_send`) and the
//! destination's (`disk_write`), so NIC and disk saturation push back on the
//! data plane exactly where a real kernel would.

use crate::controller::Controller;
use cloudsim_node::{IoOutcome, SubmitOutcome, SyscallKind};
use cloudsim_sim::{EventKind, SimEvent};
use cloudsim_types::{
    Checksum, ChunkId, EventHandle, FileId, IoTicketId, LinkId, NodeId, Pid, SimError, TransferId,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who initiated a transfer. Replica traffic shares bandwidth equally with
/// user traffic; the kind only matters for the event log and fan-out logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    User,
    Replica,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::User => "user",
            TransferKind::Replica => "replica",
        }
    }
}

/// Transfer lifecycle. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Active,
    Completed,
    Failed,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Pending => "pending",
            TransferState::Active => "active",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Aborted => "aborted",
        }
    }
}

/// Where a single chunk currently is.
#[derive(Debug, Clone)]
pub(crate) enum ChunkStatus {
    /// Replica source read not yet issued.
    AwaitingRead,
    /// Reading from the source disk (replica transfers).
    Reading {
        pid: Pid,
        ticket: Option<IoTicketId>,
    },
    /// Waiting its turn to transmit out of `at`.
    Queued { at: NodeId },
    /// `network_send` issued at `at`; CPU pending or parked on the NIC.
    AwaitingNic { at: NodeId, pid: Pid },
    /// Staged chunk whose CPU work finished while another chunk of the same
    /// transfer holds the node's outbound turn.
    ReadyToSend { at: NodeId, pid: Pid },
    /// Active flow on the wire.
    Transmitting { from: NodeId, to: NodeId, pid: Pid },
    /// Bytes done; riding out the link latency.
    InTransit {
        from: NodeId,
        to: NodeId,
        arrival: EventHandle,
    },
    /// `disk_write` issued at the destination; CPU pending or parked.
    AwaitingDisk { pid: Pid },
    /// Disk ticket in flight.
    Committing { pid: Pid, ticket: IoTicketId },
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct ChunkRuntime {
    pub size: u64,
    pub offset: u64,
    pub checksum: Checksum,
    pub status: ChunkStatus,
}

/// One chunk in transit across one link.
#[derive(Debug, Clone)]
pub(crate) struct FlowState {
    pub chunk: ChunkId,
    pub from: NodeId,
    pub to: NodeId,
    pub remaining: f64,
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub kind: TransferKind,
    pub src: NodeId,
    pub dst: NodeId,
    pub file: FileId,
    pub size: u64,
    pub chunk_size: u64,
    /// Route resolved at initiation (reporting only; movement re-queries).
    pub route: Vec<NodeId>,
    pub state: TransferState,
    pub created_at: Duration,
    pub completed_at: Option<Duration>,
    pub error: Option<SimError>,
    pub(crate) chunks: Vec<ChunkRuntime>,
    pub(crate) committed: usize,
    /// Per-node FIFO of chunks waiting to transmit out of that node.
    pub(crate) queued: BTreeMap<NodeId, VecDeque<ChunkId>>,
    /// The one chunk currently sending (or trying to) out of each node.
    pub(crate) active_out: BTreeMap<NodeId, ChunkId>,
    /// Next chunk per node, spawned early so its CPU work overlaps the
    /// active chunk's transmission.
    pub(crate) staged: BTreeMap<NodeId, ChunkId>,
    /// Replica transfers: chunks waiting for their source read.
    pub(crate) read_queue: VecDeque<ChunkId>,
    pub(crate) read_active: bool,
}

impl Transfer {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn committed_chunks(&self) -> usize {
        self.committed
    }
}

/// What a tracked OS process is doing for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PidRole {
    /// `network_send` out of a node.
    Egress,
    /// `disk_write` at the final destination.
    DstWrite,
    /// `disk_read` at a replica source.
    SrcRead,
    /// `disk_write` for a purely local store (route of length one).
    LocalWrite,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PidCtx {
    pub transfer: TransferId,
    pub chunk: ChunkId,
    pub role: PidRole,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TicketCtx {
    pub transfer: TransferId,
    pub chunk: ChunkId,
    pub pid: Pid,
    pub event: EventHandle,
}

/// All live transfer state, indexed every way the event handlers need.
#[derive(Debug, Default)]
pub struct TransferTable {
    pub(crate) transfers: BTreeMap<TransferId, Transfer>,
    /// Active flows per link, keyed by transfer for the fair-share count.
    pub(crate) flows: BTreeMap<LinkId, BTreeMap<TransferId, FlowState>>,
    pub(crate) pid_index: BTreeMap<(NodeId, Pid), PidCtx>,
    pub(crate) ticket_index: BTreeMap<(NodeId, IoTicketId), TicketCtx>,
}

impl TransferTable {
    pub fn get(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    pub(crate) fn active_ids(&self) -> Vec<TransferId> {
        self.transfers
            .values()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.id)
            .collect()
    }

    pub fn active_flow_count(&self) -> usize {
        self.flows.values().map(|m| m.len()).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transfer engine logic
// ═══════════════════════════════════════════════════════════════════════

impl Controller {
    /// Register and start a transfer between two nodes.
    pub(crate) fn start_transfer(
        &mut self,
        src: NodeId,
        dst: NodeId,
        file: FileId,
        size: u64,
        chunk_size: Option<u64>,
        kind: TransferKind,
    ) -> Result<TransferId, SimError> {
        if size == 0 {
            return Err(SimError::InvalidArgument("transfer size must be positive".into()));
        }
        let src_online = self.nodes.get(&src).map(|n| n.is_online()).unwrap_or(false);
        if !src_online {
            return Err(SimError::NodeOffline(src));
        }
        let dst_online = self.nodes.get(&dst).map(|n| n.is_online()).unwrap_or(false);
        if !dst_online {
            return Err(SimError::NodeOffline(dst));
        }

        let route = if src == dst {
            vec![src]
        } else {
            self.fabric.get_route(src, dst)?
        };

        // Reservation-first: claim the destination capacity before any chunk
        // moves.
        self.nodes
            .get_mut(&dst)
            .expect("validated above")
            .disk
            .reserve(&file, size)?;

        // Replicas reuse the source's stored chunk layout so every record
        // lines up index-for-index; fresh transfers derive their own.
        let chunk_size = match chunk_size {
            Some(c) => c,
            None => {
                let stored = if kind == TransferKind::Replica {
                    self.nodes
                        .get(&src)
                        .and_then(|n| n.disk.file_chunks(&file))
                        .and_then(|mut chunks| chunks.next())
                        .map(|record| record.length)
                } else {
                    None
                };
                stored.unwrap_or_else(|| {
                    self.config.derive_chunk_size(size, self.route_bottleneck(&route))
                })
            }
        };
        let chunk_size = chunk_size.max(1);

        let mut chunks = Vec::new();
        let mut offset = 0u64;
        while offset < size {
            let len = chunk_size.min(size - offset);
            chunks.push(ChunkRuntime {
                size: len,
                offset,
                checksum: Checksum::for_chunk(file.as_str(), chunks.len() as u32),
                status: if kind == TransferKind::Replica {
                    ChunkStatus::AwaitingRead
                } else {
                    ChunkStatus::Queued { at: src }
                },
            });
            offset += len;
        }

        self.next_transfer += 1;
        let id = TransferId(self.next_transfer);
        let mut transfer = Transfer {
            id,
            kind,
            src,
            dst,
            file: file.clone(),
            size,
            chunk_size,
            route,
            state: TransferState::Pending,
            created_at: self.scheduler.now(),
            completed_at: None,
            error: None,
            committed: 0,
            queued: BTreeMap::new(),
            active_out: BTreeMap::new(),
            staged: BTreeMap::new(),
            read_queue: VecDeque::new(),
            read_active: false,
            chunks,
        };
        if kind == TransferKind::Replica {
            transfer.read_queue = (0..transfer.chunks.len() as u32).map(ChunkId).collect();
        } else {
            transfer
                .queued
                .entry(src)
                .or_default()
                .extend((0..transfer.chunks.len() as u32).map(ChunkId));
        }
        self.transfers.transfers.insert(id, transfer);

        self.counters.transfers_started += 1;
        let (src_name, dst_name) = (self.node_name(src), self.node_name(dst));
        self.emit(
            EventKind::TransferStarted,
            src_name,
            Some(dst_name),
            vec![
                ("transfer".into(), id.to_string()),
                ("file".into(), file.to_string()),
                ("size".into(), size.to_string()),
                ("kind".into(), kind.as_str().into()),
            ],
        );
        info!(
            %id, %src, %dst, %file,
            size = %cloudsim_types::format_bytes(size),
            ?kind,
            "transfer started"
        );

        // Kick the first chunk moving.
        if kind == TransferKind::Replica {
            self.pump_replica_reads(id);
        } else if src == dst {
            self.pump_local_writes(id);
        } else {
            self.pump_transfer_at(id, src);
        }
        self.ensure_scaling_check();
        Ok(id)
    }

    /// Slowest link on a resolved route, for chunk sizing.
    fn route_bottleneck(&self, route: &[NodeId]) -> u64 {
        let mut bottleneck = u64::MAX;
        for pair in route.windows(2) {
            if let Some(link) = self.fabric.healthy_link_between(pair[0], pair[1]) {
                bottleneck = bottleneck.min(link.bandwidth_bps);
            }
        }
        for node in route {
            if let Some(n) = self.nodes.get(node) {
                bottleneck = bottleneck.min(n.nic_bandwidth_bps);
            }
        }
        if bottleneck == u64::MAX {
            1_000_000_000
        } else {
            bottleneck
        }
    }

    // ── Pumping chunks into motion ───────────────────────────────────

    /// Keep chunks moving out of `node`: activate the next chunk if none is
    /// heading out, then stage the one after it so its kernel work overlaps
    /// the active transmission.
    pub(crate) fn pump_transfer_at(&mut self, id: TransferId, node: NodeId) {
        self.activate_next(id, node);
        self.stage_next(id, node);
    }

    fn activate_next(&mut self, id: TransferId, node: NodeId) {
        let Some(transfer) = self.transfers.transfers.get_mut(&id) else {
            return;
        };
        if transfer.state.is_terminal() || transfer.active_out.contains_key(&node) {
            return;
        }

        // A staged chunk already has its process; promote it.
        if let Some(chunk) = transfer.staged.remove(&node) {
            transfer.active_out.insert(node, chunk);
            let status = transfer.chunks[chunk.0 as usize].status.clone();
            if let ChunkStatus::ReadyToSend { pid, .. } = status {
                // CPU already done: claim the NIC in this same callback.
                transfer.chunks[chunk.0 as usize].status =
                    ChunkStatus::AwaitingNic { at: node, pid };
                let Some(n) = self.nodes.get_mut(&node) else {
                    return;
                };
                match n.os.submit(pid) {
                    SubmitOutcome::Started => self.on_device_started(node, pid),
                    SubmitOutcome::Blocked => {}
                }
            }
            // Otherwise the CPU grant is still pending; handle_cpu_done
            // submits once it lands, because the chunk is now active.
            return;
        }

        let Some(chunk) = transfer.queued.get_mut(&node).and_then(|q| q.pop_front()) else {
            return;
        };
        let size = transfer.chunks[chunk.0 as usize].size;
        if transfer.state == TransferState::Pending {
            transfer.state = TransferState::Active;
        }

        let node_online = self.nodes.get(&node).map(|n| n.is_online()).unwrap_or(false);
        if !node_online {
            self.fail_transfer(id, SimError::RouteLost);
            return;
        }
        let os = &mut self.nodes.get_mut(&node).expect("checked above").os;
        match os.syscall(SyscallKind::NetworkSend, size) {
            Ok(pid) => {
                let transfer = self.transfers.transfers.get_mut(&id).expect("still present");
                transfer.active_out.insert(node, chunk);
                transfer.chunks[chunk.0 as usize].status =
                    ChunkStatus::AwaitingNic { at: node, pid };
                self.transfers.pid_index.insert(
                    (node, pid),
                    PidCtx {
                        transfer: id,
                        chunk,
                        role: PidRole::Egress,
                    },
                );
                self.ensure_os_tick(node);
            }
            Err(err) => {
                // Mid-transfer admission failure is a runtime failure for
                // the whole transfer.
                warn!(%id, %node, %chunk, code = err.code(), "egress admission failed");
                self.fail_transfer(id, err);
            }
        }
    }

    /// Spawn the process for the chunk after the active one. Prefetch is
    /// best-effort: on OOM the chunk just waits in the queue.
    fn stage_next(&mut self, id: TransferId, node: NodeId) {
        let Some(transfer) = self.transfers.transfers.get_mut(&id) else {
            return;
        };
        if transfer.state.is_terminal()
            || !transfer.active_out.contains_key(&node)
            || transfer.staged.contains_key(&node)
        {
            return;
        }
        let Some(chunk) = transfer.queued.get_mut(&node).and_then(|q| q.pop_front()) else {
            return;
        };
        let size = transfer.chunks[chunk.0 as usize].size;

        let Some(n) = self.nodes.get_mut(&node) else {
            return;
        };
        match n.os.syscall(SyscallKind::NetworkSend, size) {
            Ok(pid) => {
                let transfer = self.transfers.transfers.get_mut(&id).expect("still present");
                transfer.staged.insert(node, chunk);
                transfer.chunks[chunk.0 as usize].status =
                    ChunkStatus::AwaitingNic { at: node, pid };
                self.transfers.pid_index.insert(
                    (node, pid),
                    PidCtx {
                        transfer: id,
                        chunk,
                        role: PidRole::Egress,
                    },
                );
                self.ensure_os_tick(node);
            }
            Err(_) => {
                let transfer = self.transfers.transfers.get_mut(&id).expect("still present");
                transfer.queued.entry(node).or_default().push_front(chunk);
            }
        }
    }

    /// Issue the source `disk_read` for the next replica chunk.
    pub(crate) fn pump_replica_reads(&mut self, id: TransferId) {
        let Some(transfer) = self.transfers.transfers.get_mut(&id) else {
            return;
        };
        if transfer.state.is_terminal() || transfer.read_active {
            return;
        }
        let Some(chunk) = transfer.read_queue.pop_front() else {
            return;
        };
        let src = transfer.src;
        if transfer.state == TransferState::Pending {
            transfer.state = TransferState::Active;
        }
        let size = transfer.chunks[chunk.0 as usize].size;

        let src_online = self.nodes.get(&src).map(|n| n.is_online()).unwrap_or(false);
        if !src_online {
            self.fail_transfer(id, SimError::NodeOffline(src));
            return;
        }
        let os = &mut self.nodes.get_mut(&src).expect("checked above").os;
        match os.syscall(SyscallKind::DiskRead, size) {
            Ok(pid) => {
                let transfer = self.transfers.transfers.get_mut(&id).expect("still present");
                transfer.read_active = true;
                transfer.chunks[chunk.0 as usize].status = ChunkStatus::Reading { pid, ticket: None };
                self.transfers.pid_index.insert(
                    (src, pid),
                    PidCtx {
                        transfer: id,
                        chunk,
                        role: PidRole::SrcRead,
                    },
                );
                self.ensure_os_tick(src);
            }
            Err(err) => self.fail_transfer(id, err),
        }
    }

    /// Issue the next local `disk_write` for a same-node store.
    pub(crate) fn pump_local_writes(&mut self, id: TransferId) {
        let Some(transfer) = self.transfers.transfers.get_mut(&id) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        let dst = transfer.dst;
        if transfer.active_out.contains_key(&dst) {
            return;
        }
        let Some(chunk) = transfer.queued.get_mut(&dst).and_then(|q| q.pop_front()) else {
            return;
        };
        if transfer.state == TransferState::Pending {
            transfer.state = TransferState::Active;
        }
        let size = transfer.chunks[chunk.0 as usize].size;
        let os = &mut self.nodes.get_mut(&dst).expect("transfer validated").os;
        match os.syscall_local_write(size) {
            Ok(pid) => {
                let transfer = self.transfers.transfers.get_mut(&id).expect("still present");
                transfer.active_out.insert(dst, chunk);
                transfer.chunks[chunk.0 as usize].status = ChunkStatus::AwaitingDisk { pid };
                self.transfers.pid_index.insert(
                    (dst, pid),
                    PidCtx {
                        transfer: id,
                        chunk,
                        role: PidRole::LocalWrite,
                    },
                );
                self.ensure_os_tick(dst);
            }
            Err(err) => self.fail_transfer(id, err),
        }
    }

    // ── OS integration ───────────────────────────────────────────────

    /// One `OsTick` on a node: grant CPU, submit finished processes to
    /// their devices, and re-arm if runnable work remains.
    pub(crate) fn on_os_tick(&mut self, node: NodeId) {
        self.os_tick_armed.remove(&node);
        let Some(n) = self.nodes.get_mut(&node) else {
            return;
        };
        if !n.is_online() {
            return;
        }
        let cpu_done = n.os.tick();
        for pid in cpu_done {
            self.handle_cpu_done(node, pid);
        }
        if let Some(n) = self.nodes.get(&node) {
            if n.os.has_runnable_work() {
                self.ensure_os_tick(node);
            }
        }
    }

    fn handle_cpu_done(&mut self, node: NodeId, pid: Pid) {
        let Some(ctx) = self.transfers.pid_index.get(&(node, pid)).copied() else {
            self.handle_maintenance_cpu_done(node, pid);
            return;
        };
        if ctx.role == PidRole::Egress {
            let is_active = self
                .transfers
                .transfers
                .get(&ctx.transfer)
                .and_then(|t| t.active_out.get(&node))
                .copied()
                == Some(ctx.chunk);
            if !is_active {
                // Staged chunk: park until the active one finishes.
                if let Some(t) = self.transfers.transfers.get_mut(&ctx.transfer) {
                    t.chunks[ctx.chunk.0 as usize].status =
                        ChunkStatus::ReadyToSend { at: node, pid };
                }
                return;
            }
        }
        let os = &mut self.nodes.get_mut(&node).expect("live node").os;
        match os.submit(pid) {
            SubmitOutcome::Started => self.on_device_started(node, pid),
            SubmitOutcome::Blocked => {
                // Status already reflects the waiting stage; the device
                // completion that frees a slot will promote this pid.
            }
        }
    }

    /// A process acquired its device slot: start the real work.
    pub(crate) fn on_device_started(&mut self, node: NodeId, pid: Pid) {
        let Some(ctx) = self.transfers.pid_index.get(&(node, pid)).copied() else {
            self.complete_maintenance(node, pid);
            return;
        };
        match ctx.role {
            PidRole::Egress => self.start_flow(node, pid, ctx),
            PidRole::DstWrite | PidRole::LocalWrite => self.begin_dst_write(node, pid, ctx),
            PidRole::SrcRead => self.begin_src_read(node, pid, ctx),
        }
    }

    /// Register the flow for an egress process that now owns a NIC slot.
    fn start_flow(&mut self, node: NodeId, pid: Pid, ctx: PidCtx) {
        let live = self
            .transfers
            .transfers
            .get(&ctx.transfer)
            .map(|t| !t.state.is_terminal())
            .unwrap_or(false);
        if !live {
            // The transfer died while this process waited for its slot.
            self.retire_pid(node, pid);
            return;
        }
        let transfer = self.transfers.transfers.get(&ctx.transfer).expect("checked");
        let dst = transfer.dst;
        let size = transfer.chunks[ctx.chunk.0 as usize].size;

        let next = match self.fabric.get_route(node, dst) {
            Ok(route) if route.len() >= 2 => route[1],
            _ => {
                // No way forward from here: the transfer is lost.
                self.retire_pid(node, pid);
                self.fail_transfer(ctx.transfer, SimError::RouteLost);
                return;
            }
        };
        let Some(link) = self.fabric.healthy_link_between(node, next) else {
            self.retire_pid(node, pid);
            self.fail_transfer(ctx.transfer, SimError::RouteLost);
            return;
        };
        let link_id = link.id;

        self.transfers.flows.entry(link_id).or_default().insert(
            ctx.transfer,
            FlowState {
                chunk: ctx.chunk,
                from: node,
                to: next,
                remaining: size as f64,
            },
        );
        let transfer = self.transfers.transfers.get_mut(&ctx.transfer).expect("checked");
        transfer.chunks[ctx.chunk.0 as usize].status = ChunkStatus::Transmitting {
            from: node,
            to: next,
            pid,
        };
        debug!(transfer = %ctx.transfer, chunk = %ctx.chunk, %node, %next, "flow registered");
        self.ensure_network_tick();
    }

    fn begin_dst_write(&mut self, node: NodeId, pid: Pid, ctx: PidCtx) {
        let live = self
            .transfers
            .transfers
            .get(&ctx.transfer)
            .map(|t| !t.state.is_terminal())
            .unwrap_or(false);
        if !live {
            self.retire_pid(node, pid);
            return;
        }
        let transfer = self.transfers.transfers.get(&ctx.transfer).expect("checked");
        let file = transfer.file.clone();
        let chunk = &transfer.chunks[ctx.chunk.0 as usize];
        let (offset, size, checksum) = (chunk.offset, chunk.size, chunk.checksum);

        let disk = &mut self.nodes.get_mut(&node).expect("live node").disk;
        match disk.begin_write(&file, ctx.chunk, offset, size, checksum) {
            Ok((ticket, delay)) => {
                let event = self
                    .scheduler
                    .schedule_in(delay, SimEvent::DiskIoComplete { node, ticket })
                    .expect("delay is non-negative");
                self.transfers.ticket_index.insert(
                    (node, ticket),
                    TicketCtx {
                        transfer: ctx.transfer,
                        chunk: ctx.chunk,
                        pid,
                        event,
                    },
                );
                let transfer = self.transfers.transfers.get_mut(&ctx.transfer).expect("checked");
                transfer.chunks[ctx.chunk.0 as usize].status = ChunkStatus::Committing { pid, ticket };
            }
            Err(err) => {
                self.fail_pid(node, pid, err.code());
                self.fail_transfer(ctx.transfer, err);
            }
        }
    }

    fn begin_src_read(&mut self, node: NodeId, pid: Pid, ctx: PidCtx) {
        let live = self
            .transfers
            .transfers
            .get(&ctx.transfer)
            .map(|t| !t.state.is_terminal())
            .unwrap_or(false);
        if !live {
            self.retire_pid(node, pid);
            return;
        }
        let transfer = self.transfers.transfers.get(&ctx.transfer).expect("checked");
        let file = transfer.file.clone();

        let disk = &mut self.nodes.get_mut(&node).expect("live node").disk;
        match disk.begin_read(&file, ctx.chunk) {
            Ok((ticket, delay)) => {
                let event = self
                    .scheduler
                    .schedule_in(delay, SimEvent::DiskIoComplete { node, ticket })
                    .expect("delay is non-negative");
                self.transfers.ticket_index.insert(
                    (node, ticket),
                    TicketCtx {
                        transfer: ctx.transfer,
                        chunk: ctx.chunk,
                        pid,
                        event,
                    },
                );
                let transfer = self.transfers.transfers.get_mut(&ctx.transfer).expect("checked");
                transfer.chunks[ctx.chunk.0 as usize].status = ChunkStatus::Reading {
                    pid,
                    ticket: Some(ticket),
                };
            }
            Err(err) => {
                self.fail_pid(node, pid, err.code());
                self.fail_transfer(ctx.transfer, err);
            }
        }
    }

    // ── Bandwidth sharing ────────────────────────────────────────────

    /// One `NetworkTick`: divide every link's capacity across its flows and
    /// advance them. Flows that finish free the sender's NIC and ride the
    /// link latency to the next node.
    pub(crate) fn on_network_tick(&mut self) {
        self.network_tick_armed = false;
        let tick_secs = self.config.tick_interval.as_secs_f64();

        let mut finished: Vec<(LinkId, TransferId)> = Vec::new();
        let mut nic_allocated: BTreeMap<NodeId, f64> = BTreeMap::new();

        for (link_id, flows) in self.transfers.flows.iter_mut() {
            if flows.is_empty() {
                continue;
            }
            let Some(link) = self.fabric.link(*link_id) else {
                continue;
            };
            // Effective capacity is bounded by the link and both NICs.
            let mut capacity_bps = link.bandwidth_bps as f64;
            for endpoint in [link.a, link.b] {
                if let Some(n) = self.nodes.get(&endpoint) {
                    capacity_bps = capacity_bps.min(n.nic_bandwidth_bps as f64);
                }
            }
            let share_bps = capacity_bps / flows.len() as f64;
            let share_bytes = share_bps * tick_secs / 8.0;

            for (tid, flow) in flows.iter_mut() {
                flow.remaining -= share_bytes;
                *nic_allocated.entry(flow.from).or_default() += share_bps;
                *nic_allocated.entry(flow.to).or_default() += share_bps;
                if flow.remaining <= 0.0 {
                    finished.push((*link_id, *tid));
                }
            }
        }

        for (_, node) in self.nodes.iter_mut() {
            node.nic_allocated_bps = nic_allocated.get(&node.id).copied().unwrap_or(0.0);
        }

        for (link_id, tid) in finished {
            self.complete_hop(link_id, tid);
        }

        cloudsim_metrics::set_active_flows(self.transfers.active_flow_count());
        if self.transfers.active_flow_count() > 0 {
            self.ensure_network_tick();
        } else {
            // Ticks stop here; leave no stale utilization behind.
            for (_, node) in self.nodes.iter_mut() {
                node.nic_allocated_bps = 0.0;
            }
        }
    }

    /// A chunk finished transmitting across one link.
    fn complete_hop(&mut self, link_id: LinkId, tid: TransferId) {
        let Some(flow) = self
            .transfers
            .flows
            .get_mut(&link_id)
            .and_then(|m| m.remove(&tid))
        else {
            return;
        };
        let (chunk, from, to) = (flow.chunk, flow.from, flow.to);

        // Free the sender's NIC slot.
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        if let ChunkStatus::Transmitting { pid, .. } = transfer.chunks[chunk.0 as usize].status {
            self.retire_pid(from, pid);
        }
        let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
        transfer.active_out.remove(&from);

        // The chunk lands after the link latency.
        let latency = self
            .fabric
            .link(link_id)
            .map(|l| l.latency)
            .unwrap_or(Duration::ZERO);
        let arrival = self
            .scheduler
            .schedule_in(
                latency,
                SimEvent::ChunkArrived {
                    transfer: tid,
                    chunk,
                    from,
                    to,
                },
            )
            .expect("delay is non-negative");
        let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
        transfer.chunks[chunk.0 as usize].status = ChunkStatus::InTransit { from, to, arrival };

        // Keep the pipe full: next chunk out of this node, and for replica
        // sources, overlap the next disk read with this transmission.
        self.pump_transfer_at(tid, from);
        if self
            .transfers
            .transfers
            .get(&tid)
            .map(|t| t.kind == TransferKind::Replica && t.src == from)
            .unwrap_or(false)
        {
            self.pump_replica_reads(tid);
        }
    }

    /// A chunk landed on a node after its link latency.
    pub(crate) fn on_chunk_arrived(
        &mut self,
        tid: TransferId,
        chunk: ChunkId,
        from: NodeId,
        to: NodeId,
    ) {
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        let dst = transfer.dst;
        let size = transfer.chunks[chunk.0 as usize].size;

        let to_online = self.nodes.get(&to).map(|n| n.is_online()).unwrap_or(false);
        if !to_online {
            // The bytes on the wire are lost; retry from the sender over
            // whatever route now exists.
            let from_online = self.nodes.get(&from).map(|n| n.is_online()).unwrap_or(false);
            if !from_online {
                self.fail_transfer(tid, SimError::RouteLost);
                return;
            }
            let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
            transfer.chunks[chunk.0 as usize].status = ChunkStatus::Queued { at: from };
            transfer.queued.entry(from).or_default().push_front(chunk);
            self.pump_transfer_at(tid, from);
            return;
        }

        if to == dst {
            // Final destination: admit through the OS onto the disk.
            let os = &mut self.nodes.get_mut(&to).expect("online").os;
            match os.syscall(SyscallKind::DiskWrite, size) {
                Ok(pid) => {
                    let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
                    transfer.chunks[chunk.0 as usize].status = ChunkStatus::AwaitingDisk { pid };
                    self.transfers.pid_index.insert(
                        (to, pid),
                        PidCtx {
                            transfer: tid,
                            chunk,
                            role: PidRole::DstWrite,
                        },
                    );
                    self.ensure_os_tick(to);
                }
                Err(err) => self.fail_transfer(tid, err),
            }
        } else {
            // Forwarder: queue for the next hop.
            let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
            transfer.chunks[chunk.0 as usize].status = ChunkStatus::Queued { at: to };
            transfer.queued.entry(to).or_default().push_back(chunk);
            self.pump_transfer_at(tid, to);
        }
    }

    // ── Disk integration ─────────────────────────────────────────────

    /// A disk ticket reached its commit time.
    pub(crate) fn on_disk_io_complete(&mut self, node: NodeId, ticket: IoTicketId) {
        let Some(ctx) = self.transfers.ticket_index.remove(&(node, ticket)) else {
            return;
        };
        let now = self.scheduler.now();
        let Some(n) = self.nodes.get_mut(&node) else {
            return;
        };
        let outcome = n.disk.complete_io(ticket, now);
        match outcome {
            Ok(IoOutcome::Written { length, .. }) => {
                self.retire_pid(node, ctx.pid);
                self.finish_chunk_commit(ctx.transfer, ctx.chunk, node, length);
            }
            Ok(IoOutcome::Read { .. }) => {
                self.retire_pid(node, ctx.pid);
                self.finish_replica_read(ctx.transfer, ctx.chunk, node);
            }
            Err(err) => {
                self.fail_pid(node, ctx.pid, err.code());
                if let Some(t) = self.transfers.transfers.get_mut(&ctx.transfer) {
                    t.chunks[ctx.chunk.0 as usize].status = ChunkStatus::Failed;
                }
                self.fail_transfer(ctx.transfer, err);
            }
        }
    }

    fn finish_chunk_commit(&mut self, tid: TransferId, chunk: ChunkId, node: NodeId, length: u64) {
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        transfer.chunks[chunk.0 as usize].status = ChunkStatus::Committed;
        transfer.committed += 1;
        transfer.active_out.remove(&node);
        let done = transfer.committed == transfer.chunks.len();
        let is_local = transfer.src == transfer.dst;
        let file = transfer.file.clone();

        self.counters.chunks_committed += 1;
        self.counters.bytes_committed += length;
        if let Some(n) = self.nodes.get_mut(&node) {
            n.counters.bytes_transferred += length;
        }
        self.emit(
            EventKind::ChunkCommitted,
            self.node_name(node),
            None,
            vec![
                ("transfer".into(), tid.to_string()),
                ("file".into(), file.to_string()),
                ("chunk".into(), chunk.to_string()),
            ],
        );

        if done {
            self.finalize_transfer(tid);
        } else if is_local {
            self.pump_local_writes(tid);
        }
    }

    fn finish_replica_read(&mut self, tid: TransferId, chunk: ChunkId, node: NodeId) {
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        transfer.read_active = false;
        transfer.chunks[chunk.0 as usize].status = ChunkStatus::Queued { at: node };
        transfer.queued.entry(node).or_default().push_back(chunk);
        self.pump_transfer_at(tid, node);
        // Next read overlaps this chunk's transmission.
        self.pump_replica_reads(tid);
    }

    // ── Completion and failure ───────────────────────────────────────

    fn finalize_transfer(&mut self, tid: TransferId) {
        let now = self.scheduler.now();
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        transfer.state = TransferState::Completed;
        transfer.completed_at = Some(now);
        let (src, dst, kind, size, file) = (
            transfer.src,
            transfer.dst,
            transfer.kind,
            transfer.size,
            transfer.file.clone(),
        );
        let duration = (now - transfer.created_at).as_secs_f64();

        if let Some(n) = self.nodes.get_mut(&dst) {
            n.counters.requests_processed += 1;
        }
        self.counters.transfers_completed += 1;
        cloudsim_metrics::record_transfer_completed(size, duration);
        let (src_name, dst_name) = (self.node_name(src), self.node_name(dst));
        self.emit(
            EventKind::TransferCompleted,
            src_name,
            Some(dst_name),
            vec![
                ("transfer".into(), tid.to_string()),
                ("file".into(), file.to_string()),
                ("kind".into(), kind.as_str().into()),
                ("duration_secs".into(), format!("{duration:.3}")),
            ],
        );
        info!(%tid, %file, duration, "transfer completed");

        if kind == TransferKind::User {
            self.fan_out_completed_write(dst, file, size);
        }
        self.ensure_scaling_check();
    }

    /// Fail a transfer, cancelling all of its pending work. The partial
    /// destination chunks and their reservation are retained until the
    /// caller aborts explicitly.
    pub(crate) fn fail_transfer(&mut self, tid: TransferId, error: SimError) {
        self.teardown_transfer(tid, TransferState::Failed, Some(error));
    }

    /// Cancel a transfer at the caller's request, releasing the destination
    /// reservation and any partial chunks. On a transfer that already
    /// failed, this reclaims the retained residue without changing state.
    pub(crate) fn abort_transfer(&mut self, tid: TransferId) -> Result<(), SimError> {
        let state = match self.transfers.transfers.get(&tid) {
            Some(t) => t.state,
            None => {
                return Err(SimError::InvalidArgument(format!("unknown transfer {tid}")))
            }
        };
        match state {
            TransferState::Completed | TransferState::Aborted => {
                return Err(SimError::InvalidArgument(format!(
                    "transfer {tid} already {}",
                    state.as_str()
                )));
            }
            TransferState::Failed => {}
            _ => self.teardown_transfer(tid, TransferState::Aborted, None),
        }
        // Reclaim the destination space and cancel any straggler tickets.
        let (dst, file) = {
            let t = self.transfers.transfers.get(&tid).expect("checked above");
            (t.dst, t.file.clone())
        };
        if let Some(n) = self.nodes.get_mut(&dst) {
            let cancelled = n.disk.release(&file);
            for ticket in cancelled {
                if let Some(ctx) = self.transfers.ticket_index.remove(&(dst, ticket)) {
                    self.scheduler.cancel(ctx.event);
                }
            }
        }
        Ok(())
    }

    fn teardown_transfer(&mut self, tid: TransferId, terminal: TransferState, error: Option<SimError>) {
        let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        transfer.state = terminal;
        transfer.error = error.clone();
        transfer.completed_at = Some(self.scheduler.now());
        transfer.queued.clear();
        transfer.active_out.clear();
        transfer.staged.clear();
        transfer.read_queue.clear();
        let (src, dst, kind, file) = (
            transfer.src,
            transfer.dst,
            transfer.kind,
            transfer.file.clone(),
        );

        // Cancel per-chunk pending work.
        let chunk_statuses: Vec<(u32, ChunkStatus)> = transfer
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i as u32, c.status.clone()))
            .collect();
        for (index, status) in chunk_statuses {
            match status {
                ChunkStatus::InTransit { arrival, .. } => {
                    self.scheduler.cancel(arrival);
                }
                ChunkStatus::Transmitting { from, pid, .. } => {
                    self.retire_pid(from, pid);
                }
                ChunkStatus::AwaitingNic { at, pid }
                | ChunkStatus::ReadyToSend { at, pid } => {
                    self.retire_pid(at, pid);
                }
                ChunkStatus::AwaitingDisk { pid } => {
                    self.retire_pid(dst, pid);
                }
                ChunkStatus::Committing { pid, ticket } => {
                    self.retire_pid(dst, pid);
                    if let Some(ctx) = self.transfers.ticket_index.remove(&(dst, ticket)) {
                        self.scheduler.cancel(ctx.event);
                    }
                    if let Some(n) = self.nodes.get_mut(&dst) {
                        n.disk.cancel_ticket(ticket);
                    }
                }
                ChunkStatus::Reading { pid, ticket } => {
                    self.retire_pid(src, pid);
                    if let Some(ticket) = ticket {
                        if let Some(ctx) = self.transfers.ticket_index.remove(&(src, ticket)) {
                            self.scheduler.cancel(ctx.event);
                        }
                        if let Some(n) = self.nodes.get_mut(&src) {
                            n.disk.cancel_ticket(ticket);
                        }
                    }
                }
                ChunkStatus::Queued { .. }
                | ChunkStatus::AwaitingRead
                | ChunkStatus::Committed
                | ChunkStatus::Failed => {}
            }
            let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
            if !matches!(
                transfer.chunks[index as usize].status,
                ChunkStatus::Committed
            ) {
                transfer.chunks[index as usize].status = ChunkStatus::Failed;
            }
        }

        // Remove all flows belonging to this transfer.
        for (_, flows) in self.transfers.flows.iter_mut() {
            flows.remove(&tid);
        }

        if let Some(n) = self.nodes.get_mut(&dst) {
            n.counters.failed_transfers += 1;
        }

        let (src_name, dst_name) = (self.node_name(src), self.node_name(dst));
        match terminal {
            TransferState::Aborted => {
                self.counters.transfers_aborted += 1;
                self.emit(
                    EventKind::TransferAborted,
                    src_name,
                    Some(dst_name),
                    vec![
                        ("transfer".into(), tid.to_string()),
                        ("file".into(), file.to_string()),
                    ],
                );
            }
            _ => {
                let code = error.as_ref().map(|e| e.code()).unwrap_or("unknown");
                self.counters.transfers_failed += 1;
                cloudsim_metrics::record_transfer_failed(code);
                self.emit(
                    EventKind::TransferFailed,
                    src_name.clone(),
                    Some(dst_name.clone()),
                    vec![
                        ("transfer".into(), tid.to_string()),
                        ("file".into(), file.to_string()),
                        ("code".into(), code.into()),
                    ],
                );
                if kind == TransferKind::Replica {
                    self.counters.replica_syncs_failed += 1;
                    cloudsim_metrics::record_replica_sync_failed();
                    self.emit(
                        EventKind::ReplicaSyncFailed,
                        src_name,
                        Some(dst_name),
                        vec![
                            ("file".into(), file.to_string()),
                            ("code".into(), code.into()),
                        ],
                    );
                }
                warn!(%tid, %file, code, "transfer failed");
            }
        }
    }

    // ── Failover ─────────────────────────────────────────────────────

    /// Revalidate every active transfer after a topology change: interrupt
    /// flows on unhealthy links, fail transfers stranded on offline nodes,
    /// and re-pump so chunks re-resolve their next hop.
    pub(crate) fn reroute_active_transfers(&mut self) {
        for tid in self.transfers.active_ids() {
            self.revalidate_transfer(tid);
        }
    }

    fn revalidate_transfer(&mut self, tid: TransferId) {
        let Some(transfer) = self.transfers.transfers.get(&tid) else {
            return;
        };
        if transfer.state.is_terminal() {
            return;
        }
        let (src, dst) = (transfer.src, transfer.dst);
        let src_online = self.nodes.get(&src).map(|n| n.is_online()).unwrap_or(false);
        let dst_online = self.nodes.get(&dst).map(|n| n.is_online()).unwrap_or(false);
        if !src_online || !dst_online {
            let offline = if src_online { dst } else { src };
            self.fail_transfer(tid, SimError::NodeOffline(offline));
            return;
        }

        // Interrupt flows whose link died. Bytes on the wire are lost; the
        // chunk restarts its current hop from the sender.
        let broken: Vec<(LinkId, NodeId, NodeId, ChunkId)> = self
            .transfers
            .flows
            .iter()
            .filter_map(|(link_id, flows)| {
                flows.get(&tid).map(|f| (*link_id, f.from, f.to, f.chunk))
            })
            .filter(|(_, from, to, _)| self.fabric.healthy_link_between(*from, *to).is_none())
            .collect();
        for (link_id, from, _to, chunk) in broken {
            if let Some(flows) = self.transfers.flows.get_mut(&link_id) {
                flows.remove(&tid);
            }
            let Some(transfer) = self.transfers.transfers.get_mut(&tid) else {
                return;
            };
            if let ChunkStatus::Transmitting { pid, .. } = transfer.chunks[chunk.0 as usize].status {
                self.retire_pid(from, pid);
            }
            let transfer = self.transfers.transfers.get_mut(&tid).expect("still present");
            transfer.active_out.remove(&from);
            transfer.chunks[chunk.0 as usize].status = ChunkStatus::Queued { at: from };
            transfer.queued.entry(from).or_default().push_front(chunk);
            debug!(%tid, %chunk, %from, "flow interrupted, chunk requeued");
        }

        // Chunks waiting at an offline forwarder have nowhere to resume from.
        let Some(transfer) = self.transfers.transfers.get(&tid) else {
            return;
        };
        let stranded = transfer.chunks.iter().any(|c| match c.status {
            ChunkStatus::Queued { at }
            | ChunkStatus::AwaitingNic { at, .. }
            | ChunkStatus::ReadyToSend { at, .. } => self
                .nodes
                .get(&at)
                .map(|n| !n.is_online())
                .unwrap_or(true),
            _ => false,
        });
        if stranded {
            self.fail_transfer(tid, SimError::RouteLost);
            return;
        }

        // Restart movement from every node that has queued or staged chunks.
        let nodes_to_pump: Vec<NodeId> = transfer
            .queued
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(n, _)| *n)
            .chain(transfer.staged.keys().copied())
            .collect();
        for node in nodes_to_pump {
            self.pump_transfer_at(tid, node);
        }
    }

    // ── Process bookkeeping ──────────────────────────────────────────

    /// Cleanly retire a tracked process and start whatever its freed device
    /// slot admits next.
    pub(crate) fn retire_pid(&mut self, node: NodeId, pid: Pid) {
        self.transfers.pid_index.remove(&(node, pid));
        let promoted = match self.nodes.get_mut(&node) {
            Some(n) => n.os.complete(pid),
            None => Vec::new(),
        };
        for next in promoted {
            self.on_device_started(node, next);
        }
    }

    /// Retire a tracked process as failed (device error).
    pub(crate) fn fail_pid(&mut self, node: NodeId, pid: Pid, reason: &str) {
        self.transfers.pid_index.remove(&(node, pid));
        let promoted = match self.nodes.get_mut(&node) {
            Some(n) => n.os.fail(pid, reason),
            None => Vec::new(),
        };
        for next in promoted {
            self.on_device_started(node, next);
        }
    }
}
