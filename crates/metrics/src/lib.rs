//! Metrics facade for CloudSim.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and
//! default no-op implementations. A global singleton recorder is accessed via
//! [`recorder()`], and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! cloudsim_metrics::record_chunk_committed(chunk_bytes);
//! cloudsim_metrics::record_transfer_completed(bytes, duration_secs);
//! ```
//!
//! At startup, install a backend; with none installed all recording is a
//! no-op, which is what deterministic test runs want.

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Transfers ────────────────────────────────────────────────────

    /// Record a completed transfer with its size and simulated duration.
    fn record_transfer_completed(&self, bytes: u64, duration_secs: f64) {}

    /// Record a failed transfer by error code.
    fn record_transfer_failed(&self, code: &str) {}

    /// Record a committed chunk at a destination disk.
    fn record_chunk_committed(&self, bytes: u64) {}

    /// Set the gauge of currently active flows across all links.
    fn set_active_flows(&self, count: usize) {}

    // ── Nodes ────────────────────────────────────────────────────────

    /// Record an OS process failure on a node.
    fn record_os_process_failure(&self) {}

    /// Record a disk I/O completion with its simulated latency.
    fn record_disk_io(&self, latency_secs: f64) {}

    /// Set a node's storage utilization gauge (0.0 - 1.0).
    fn set_storage_utilization(&self, node: u32, fraction: f64) {}

    // ── Cluster ──────────────────────────────────────────────────────

    /// Record a demand-driven replica spawn.
    fn record_replica_spawned(&self) {}

    /// Record a failed replica sync.
    fn record_replica_sync_failed(&self) {}

    // ── Routing ──────────────────────────────────────────────────────

    /// Record a routing-table recomputation.
    fn record_route_recompute(&self) {}
}

/// No-op recorder used when no backend is installed.
struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

// ═══════════════════════════════════════════════════════════════════════
// Global recorder
// ═══════════════════════════════════════════════════════════════════════

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a metrics backend. Returns `false` if one is already installed.
pub fn install(recorder: Box<dyn MetricsRecorder>) -> bool {
    RECORDER.set(recorder).is_ok()
}

/// The installed recorder, or the shared no-op.
pub fn recorder() -> &'static dyn MetricsRecorder {
    static NOOP: NoopRecorder = NoopRecorder;
    match RECORDER.get() {
        Some(r) => r.as_ref(),
        None => &NOOP,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Free functions
// ═══════════════════════════════════════════════════════════════════════

pub fn record_transfer_completed(bytes: u64, duration_secs: f64) {
    recorder().record_transfer_completed(bytes, duration_secs);
}

pub fn record_transfer_failed(code: &str) {
    recorder().record_transfer_failed(code);
}

pub fn record_chunk_committed(bytes: u64) {
    recorder().record_chunk_committed(bytes);
}

pub fn set_active_flows(count: usize) {
    recorder().set_active_flows(count);
}

pub fn record_os_process_failure() {
    recorder().record_os_process_failure();
}

pub fn record_disk_io(latency_secs: f64) {
    recorder().record_disk_io(latency_secs);
}

pub fn set_storage_utilization(node: u32, fraction: f64) {
    recorder().set_storage_utilization(node, fraction);
}

pub fn record_replica_spawned() {
    recorder().record_replica_spawned();
}

pub fn record_replica_sync_failed() {
    recorder().record_replica_sync_failed();
}

pub fn record_route_recompute() {
    recorder().record_route_recompute();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_recorder_accepts_everything() {
        // No backend installed: free functions must be safe to call.
        record_transfer_completed(1_000_000, 8.0);
        record_transfer_failed("route_lost");
        record_chunk_committed(8_000_000);
        set_active_flows(3);
        record_os_process_failure();
        record_route_recompute();
    }
}
