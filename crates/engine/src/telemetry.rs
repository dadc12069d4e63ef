//! Aggregate telemetry counters and snapshot views.

use serde::{Deserialize, Serialize};

/// Data-plane counters maintained by the controller.
///
/// Node and link lifecycle operations deliberately do not touch these, so
/// adding and removing a node is counter-neutral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub transfers_started: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub transfers_aborted: u64,
    pub replica_syncs_failed: u64,
    pub replicas_spawned: u64,
    pub chunks_committed: u64,
    pub bytes_committed: u64,
}

/// Point-in-time aggregate view returned by `Controller::telemetry`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub now_secs: f64,
    pub events_processed: u64,
    pub node_count: usize,
    pub online_node_count: usize,
    pub link_count: usize,
    pub active_transfers: usize,
    pub total_storage_bytes: u64,
    pub used_storage_bytes: u64,
    pub reserved_storage_bytes: u64,
    pub total_bandwidth_bps: u64,
    pub os_process_failures: u64,
    pub route_recomputes: u64,
    pub counters: TelemetryCounters,
}

/// Result of a bounded `step` run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// Simulated seconds covered by this step.
    pub duration_secs: f64,
    pub events_processed: u64,
    pub now_secs: f64,
}
