//! Per-node virtual operating system.
//!
//! Models the kernel-side cost of moving chunks: every syscall spawns a
//! process that reserves RAM up front, earns CPU time slices round-robin,
//! and then occupies a slot on a fixed-concurrency device until the engine
//! reports the underlying work finished. Saturated devices park processes in
//! a FIFO; completions promote the next parked process, which is how
//! backpressure propagates to the transfer engine.
//!
//! The OS never touches the scheduler. `tick()` and the completion methods
//! return the process ids whose state changed so the engine can act on them
//! inside the current event callback.

use cloudsim_types::{Pid, SimError};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

/// What a process is doing, which also selects its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Admit an incoming chunk onto the local disk (destination side).
    Ingest,
    /// Transmit a chunk onto an outgoing link.
    Egress,
    /// Read a stored chunk back for replication or retrieval.
    DiskRead,
    /// Local write outside a network transfer.
    DiskWrite,
    /// Background housekeeping (replica spawn wiring).
    Maintenance,
}

impl ProcessKind {
    pub fn device(&self) -> DeviceKind {
        match self {
            ProcessKind::Ingest | ProcessKind::DiskRead | ProcessKind::DiskWrite => DeviceKind::Disk,
            ProcessKind::Egress => DeviceKind::Nic,
            ProcessKind::Maintenance => DeviceKind::Maintenance,
        }
    }
}

/// Syscall surface exposed to the storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    DiskRead,
    DiskWrite,
    NetworkSend,
    MaintenanceHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Disk,
    Nic,
    Maintenance,
}

/// Process lifecycle.
///
/// `Ready` processes are earning CPU slices. Once their CPU budget is spent
/// they become `CpuDone` and wait for the engine to submit them to their
/// device, which yields `Running` (slot held, work in flight) or `Blocked`
/// (device saturated). Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    CpuDone,
    Blocked,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
struct Process {
    kind: ProcessKind,
    cpu_ticks_remaining: u32,
    ram_reserved: u64,
    state: ProcessState,
}

#[derive(Debug, Clone)]
struct Device {
    limit: usize,
    inflight: usize,
    parked: VecDeque<Pid>,
}

impl Device {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            inflight: 0,
            parked: VecDeque::new(),
        }
    }
}

/// Result of submitting a CPU-complete process to its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Slot acquired; the engine should start the underlying work now.
    Started,
    /// Device saturated; the process is parked until a completion frees a slot.
    Blocked,
}

/// Kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsConfig {
    pub cpu_cores: u32,
    pub ram_capacity: u64,
    /// Simulated duration of one CPU grant.
    pub cpu_time_slice: Duration,
    /// Parallel transmissions the NIC sustains.
    pub nic_concurrency: usize,
    /// Outstanding I/Os the disk sustains.
    pub disk_concurrency: usize,
    /// CPU ticks charged per I/O or transmit syscall.
    pub cpu_ticks_io: u32,
    /// CPU ticks charged per maintenance hook.
    pub cpu_ticks_maintenance: u32,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            cpu_cores: 8,
            ram_capacity: 32_000_000_000,
            cpu_time_slice: Duration::from_millis(1),
            nic_concurrency: 4,
            disk_concurrency: 1,
            cpu_ticks_io: 1,
            cpu_ticks_maintenance: 2,
        }
    }
}

/// The per-node kernel: process table, RAM accounting, CPU round-robin, and
/// three fixed-concurrency devices.
#[derive(Debug, Clone)]
pub struct VirtualOs {
    config: OsConfig,
    ram_used: u64,
    processes: BTreeMap<Pid, Process>,
    ready: VecDeque<Pid>,
    disk: Device,
    nic: Device,
    maintenance: Device,
    next_pid: u64,
    syscall_count: u64,
    failure_count: u64,
    failures_window: u64,
    oom_denials: u64,
}

impl VirtualOs {
    pub fn new(config: OsConfig) -> Self {
        Self {
            ram_used: 0,
            processes: BTreeMap::new(),
            ready: VecDeque::new(),
            disk: Device::new(config.disk_concurrency),
            nic: Device::new(config.nic_concurrency),
            maintenance: Device::new(1),
            next_pid: 0,
            syscall_count: 0,
            failure_count: 0,
            failures_window: 0,
            oom_denials: 0,
            config,
        }
    }

    pub fn config(&self) -> &OsConfig {
        &self.config
    }

    // ── Syscalls ─────────────────────────────────────────────────────

    /// Spawn the process backing a syscall. RAM admission happens here:
    /// the reservation is held until the process reaches a terminal state.
    pub fn syscall(&mut self, kind: SyscallKind, ram: u64) -> Result<Pid, SimError> {
        self.syscall_count += 1;
        if self.ram_used + ram > self.config.ram_capacity {
            self.oom_denials += 1;
            return Err(SimError::Oom {
                needed: ram,
                available: self.config.ram_capacity - self.ram_used,
            });
        }

        let (process_kind, cpu_ticks) = match kind {
            SyscallKind::DiskRead => (ProcessKind::DiskRead, self.config.cpu_ticks_io),
            SyscallKind::DiskWrite => (ProcessKind::Ingest, self.config.cpu_ticks_io),
            SyscallKind::NetworkSend => (ProcessKind::Egress, self.config.cpu_ticks_io),
            SyscallKind::MaintenanceHook => {
                (ProcessKind::Maintenance, self.config.cpu_ticks_maintenance)
            }
        };

        self.next_pid += 1;
        let pid = Pid(self.next_pid);
        self.ram_used += ram;
        self.processes.insert(
            pid,
            Process {
                kind: process_kind,
                cpu_ticks_remaining: cpu_ticks.max(1),
                ram_reserved: ram,
                state: ProcessState::Ready,
            },
        );
        self.ready.push_back(pid);
        trace!(%pid, ?kind, ram, "spawned");
        Ok(pid)
    }

    /// Spawn a local-write process (no network transfer involved).
    pub fn syscall_local_write(&mut self, ram: u64) -> Result<Pid, SimError> {
        let pid = self.syscall(SyscallKind::DiskWrite, ram)?;
        if let Some(p) = self.processes.get_mut(&pid) {
            p.kind = ProcessKind::DiskWrite;
        }
        Ok(pid)
    }

    // ── CPU scheduling ───────────────────────────────────────────────

    /// Grant one CPU tick to up to `cpu_cores` ready processes, round-robin.
    /// Returns the pids whose CPU budget completed this tick; the engine
    /// decides when each is submitted to its device.
    pub fn tick(&mut self) -> Vec<Pid> {
        let grants = (self.config.cpu_cores as usize).min(self.ready.len());
        let mut cpu_done = Vec::new();
        for _ in 0..grants {
            let Some(pid) = self.ready.pop_front() else {
                break;
            };
            let Some(process) = self.processes.get_mut(&pid) else {
                continue;
            };
            process.cpu_ticks_remaining = process.cpu_ticks_remaining.saturating_sub(1);
            if process.cpu_ticks_remaining == 0 {
                process.state = ProcessState::CpuDone;
                cpu_done.push(pid);
            } else {
                self.ready.push_back(pid);
            }
        }
        cpu_done
    }

    /// Whether another `OsTick` is needed.
    pub fn has_runnable_work(&self) -> bool {
        !self.ready.is_empty()
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Submit a CPU-complete process to its device.
    pub fn submit(&mut self, pid: Pid) -> SubmitOutcome {
        let Some(process) = self.processes.get(&pid) else {
            return SubmitOutcome::Blocked;
        };
        debug_assert_eq!(process.state, ProcessState::CpuDone, "submit before CPU done");
        let device_kind = process.kind.device();
        let has_slot = {
            let device = self.device(device_kind);
            device.inflight < device.limit
        };
        if has_slot {
            self.device_mut(device_kind).inflight += 1;
            if let Some(p) = self.processes.get_mut(&pid) {
                p.state = ProcessState::Running;
            }
            SubmitOutcome::Started
        } else {
            self.device_mut(device_kind).parked.push_back(pid);
            if let Some(p) = self.processes.get_mut(&pid) {
                p.state = ProcessState::Blocked;
            }
            SubmitOutcome::Blocked
        }
    }

    /// Mark a running process's device work finished. Frees its RAM and
    /// device slot and fires the interrupt. Returns the pids promoted from
    /// the device queue to `Running`; the engine starts their work.
    pub fn complete(&mut self, pid: Pid) -> Vec<Pid> {
        self.retire(pid, ProcessState::Done)
    }

    /// Mark a process failed (device error). Counts toward the node's
    /// failure telemetry that demand scaling watches.
    pub fn fail(&mut self, pid: Pid, reason: &str) -> Vec<Pid> {
        let live = self
            .processes
            .get(&pid)
            .map(|p| !matches!(p.state, ProcessState::Done | ProcessState::Failed))
            .unwrap_or(false);
        if live {
            self.failure_count += 1;
            self.failures_window += 1;
            cloudsim_metrics::record_os_process_failure();
            debug!(%pid, reason, "process failed");
        }
        self.retire(pid, ProcessState::Failed)
    }

    /// Drop every live process (node failure). Terminal states are kept for
    /// inspection but RAM and devices reset.
    pub fn kill_all(&mut self) -> usize {
        let live: Vec<Pid> = self
            .processes
            .iter()
            .filter(|(_, p)| {
                !matches!(p.state, ProcessState::Done | ProcessState::Failed)
            })
            .map(|(pid, _)| *pid)
            .collect();
        let count = live.len();
        for pid in live {
            if let Some(p) = self.processes.get_mut(&pid) {
                p.state = ProcessState::Failed;
            }
        }
        self.ram_used = 0;
        self.ready.clear();
        self.disk = Device::new(self.config.disk_concurrency);
        self.nic = Device::new(self.config.nic_concurrency);
        self.maintenance = Device::new(1);
        count
    }

    // ── Telemetry ────────────────────────────────────────────────────

    pub fn ram_used(&self) -> u64 {
        self.ram_used
    }

    pub fn ram_utilization(&self) -> f64 {
        if self.config.ram_capacity == 0 {
            return 0.0;
        }
        self.ram_used as f64 / self.config.ram_capacity as f64
    }

    pub fn device_inflight(&self, kind: DeviceKind) -> usize {
        self.device(kind).inflight
    }

    pub fn device_blocked(&self, kind: DeviceKind) -> usize {
        self.device(kind).parked.len()
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.processes.get(&pid).map(|p| p.state)
    }

    pub fn process_kind(&self, pid: Pid) -> Option<ProcessKind> {
        self.processes.get(&pid).map(|p| p.kind)
    }

    pub fn syscall_count(&self) -> u64 {
        self.syscall_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn oom_denials(&self) -> u64 {
        self.oom_denials
    }

    /// Failures since the last scaling check.
    pub fn drain_recent_failures(&mut self) -> u64 {
        std::mem::take(&mut self.failures_window)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn retire(&mut self, pid: Pid, terminal: ProcessState) -> Vec<Pid> {
        let Some(process) = self.processes.get_mut(&pid) else {
            return Vec::new();
        };
        let previous = process.state;
        if matches!(previous, ProcessState::Done | ProcessState::Failed) {
            return Vec::new();
        }
        let device_kind = process.kind.device();
        let ram = process.ram_reserved;
        process.state = terminal;
        self.ram_used -= ram;

        match previous {
            ProcessState::Running => {
                let device = self.device_mut(device_kind);
                device.inflight -= 1;
                // Promote parked work into the freed slot.
                if let Some(next) = device.parked.pop_front() {
                    device.inflight += 1;
                    if let Some(p) = self.processes.get_mut(&next) {
                        p.state = ProcessState::Running;
                    }
                    return vec![next];
                }
            }
            ProcessState::Blocked => {
                let device = self.device_mut(device_kind);
                device.parked.retain(|p| *p != pid);
            }
            ProcessState::Ready => {
                self.ready.retain(|p| *p != pid);
            }
            ProcessState::CpuDone | ProcessState::Done | ProcessState::Failed => {}
        }
        Vec::new()
    }

    fn device(&self, kind: DeviceKind) -> &Device {
        match kind {
            DeviceKind::Disk => &self.disk,
            DeviceKind::Nic => &self.nic,
            DeviceKind::Maintenance => &self.maintenance,
        }
    }

    fn device_mut(&mut self, kind: DeviceKind) -> &mut Device {
        match kind {
            DeviceKind::Disk => &mut self.disk,
            DeviceKind::Nic => &mut self.nic,
            DeviceKind::Maintenance => &mut self.maintenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_with(nic: usize, ram: u64) -> VirtualOs {
        VirtualOs::new(OsConfig {
            nic_concurrency: nic,
            ram_capacity: ram,
            ..OsConfig::default()
        })
    }

    fn run_cpu(os: &mut VirtualOs) -> Vec<Pid> {
        let mut done = Vec::new();
        while os.has_runnable_work() {
            done.extend(os.tick());
        }
        done
    }

    #[test]
    fn ram_admission_rejects_with_oom() {
        let mut os = os_with(4, 1_000);
        os.syscall(SyscallKind::NetworkSend, 800).unwrap();
        let err = os.syscall(SyscallKind::NetworkSend, 300).unwrap_err();
        assert_eq!(err.code(), "oom");
        assert_eq!(os.oom_denials(), 1);
        assert_eq!(os.ram_used(), 800);
    }

    #[test]
    fn nic_concurrency_blocks_excess_work() {
        let mut os = os_with(2, 10_000);
        let pids: Vec<Pid> = (0..4)
            .map(|_| os.syscall(SyscallKind::NetworkSend, 100).unwrap())
            .collect();
        let cpu_done = run_cpu(&mut os);
        assert_eq!(cpu_done.len(), 4);

        let outcomes: Vec<SubmitOutcome> = pids.iter().map(|p| os.submit(*p)).collect();
        assert_eq!(
            outcomes,
            vec![
                SubmitOutcome::Started,
                SubmitOutcome::Started,
                SubmitOutcome::Blocked,
                SubmitOutcome::Blocked,
            ]
        );
        assert_eq!(os.device_inflight(DeviceKind::Nic), 2);
        assert_eq!(os.device_blocked(DeviceKind::Nic), 2);

        // Completing one transmission promotes exactly one parked process.
        let promoted = os.complete(pids[0]);
        assert_eq!(promoted, vec![pids[2]]);
        assert_eq!(os.process_state(pids[2]), Some(ProcessState::Running));
        assert_eq!(os.device_blocked(DeviceKind::Nic), 1);
    }

    #[test]
    fn failure_frees_resources_and_counts() {
        let mut os = os_with(1, 1_000);
        let a = os.syscall(SyscallKind::DiskWrite, 400).unwrap();
        let b = os.syscall(SyscallKind::DiskWrite, 400).unwrap();
        run_cpu(&mut os);
        os.submit(a);
        os.submit(b);

        let promoted = os.fail(a, "disk_offline");
        assert_eq!(promoted, vec![b]);
        assert_eq!(os.failure_count(), 1);
        assert_eq!(os.drain_recent_failures(), 1);
        assert_eq!(os.drain_recent_failures(), 0, "window drains once");
        assert_eq!(os.ram_used(), 400, "only the survivor holds RAM");
    }

    #[test]
    fn round_robin_shares_cpu() {
        let mut os = VirtualOs::new(OsConfig {
            cpu_cores: 1,
            cpu_ticks_io: 2,
            ..OsConfig::default()
        });
        let a = os.syscall(SyscallKind::NetworkSend, 0).unwrap();
        let b = os.syscall(SyscallKind::NetworkSend, 0).unwrap();

        // One core, two ticks each: a and b alternate and finish on
        // consecutive ticks.
        assert!(os.tick().is_empty());
        assert!(os.tick().is_empty());
        assert_eq!(os.tick(), vec![a]);
        assert_eq!(os.tick(), vec![b]);
    }

    #[test]
    fn kill_all_resets_devices_and_ram() {
        let mut os = os_with(1, 1_000);
        let a = os.syscall(SyscallKind::NetworkSend, 500).unwrap();
        run_cpu(&mut os);
        os.submit(a);
        assert_eq!(os.device_inflight(DeviceKind::Nic), 1);

        let dropped = os.kill_all();
        assert_eq!(dropped, 1);
        assert_eq!(os.ram_used(), 0);
        assert_eq!(os.device_inflight(DeviceKind::Nic), 0);
        assert_eq!(os.process_state(a), Some(ProcessState::Failed));
    }
}
