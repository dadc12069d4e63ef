//! Simulator configuration.

use cloudsim_network::RoutingStrategy;
use std::time::Duration;

/// Demand-driven scaling policy knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingConfig {
    pub enabled: bool,
    /// Spawn siblings until clusters reach this size. Only takes effect when
    /// `auto_replication` is on; explicit topologies stay untouched otherwise.
    pub replication_factor: usize,
    /// Hard cap on cluster membership, spawns included.
    pub max_replicas_per_cluster: usize,
    pub auto_replication: bool,
    /// Storage utilization (committed + reserved) that triggers a spawn.
    pub storage_threshold: f64,
    /// NIC utilization that triggers a spawn.
    pub bandwidth_threshold: f64,
    /// OS process failures per check window that trigger a spawn.
    pub os_failure_threshold: u64,
    /// RAM utilization that triggers a spawn.
    pub os_memory_utilization_threshold: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replication_factor: 3,
            max_replicas_per_cluster: 5,
            auto_replication: false,
            storage_threshold: 0.85,
            bandwidth_threshold: 0.80,
            os_failure_threshold: 3,
            os_memory_utilization_threshold: 0.90,
        }
    }
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Seed for zone assignment and auto link profiles. The data plane
    /// draws nothing from the RNG.
    pub seed: u64,
    /// Bandwidth-sharing tick.
    pub tick_interval: Duration,
    /// Distance-vector exchange period.
    pub dv_interval: Duration,
    /// Demand-scaling evaluation period.
    pub scaling_interval: Duration,
    pub routing_strategy: RoutingStrategy,
    pub scaling: ScalingConfig,
    /// Event log ring size.
    pub event_log_capacity: usize,
    /// Chunk-size clamp when the caller leaves it unset.
    pub chunk_min: u64,
    pub chunk_max: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            tick_interval: Duration::from_millis(1),
            dv_interval: Duration::from_secs(1),
            scaling_interval: Duration::from_secs(2),
            routing_strategy: RoutingStrategy::LinkState,
            scaling: ScalingConfig::default(),
            event_log_capacity: 256,
            chunk_min: 256_000,
            chunk_max: 8_000_000,
        }
    }
}

impl SimConfig {
    /// Chunk size for a transfer when the caller did not pick one.
    ///
    /// Starts from a size tier (small files move in small chunks so progress
    /// events stay meaningful), caps it so one chunk crosses the bottleneck
    /// link in a bounded number of ticks, then clamps.
    pub fn derive_chunk_size(&self, file_size: u64, bottleneck_bps: u64) -> u64 {
        let tier = if file_size < 10_000_000 {
            512_000
        } else if file_size < 100_000_000 {
            2_000_000
        } else {
            8_000_000
        };
        let bytes_per_tick =
            (bottleneck_bps as f64 * self.tick_interval.as_secs_f64() / 8.0).max(1.0) as u64;
        let tick_bound = bytes_per_tick.saturating_mul(64);
        tier.min(tick_bound).clamp(self.chunk_min, self.chunk_max)
    }
}
