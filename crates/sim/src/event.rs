//! Event types dispatched by the scheduler.

use cloudsim_types::{ChunkId, IoTicketId, NodeId, TransferId};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order; lower
/// values run first. Internal events are consequences of prior processing and
/// must land before new timer ticks or network deliveries to preserve
/// causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Consequences of prior event processing (device completions).
    Internal = 0,

    /// Periodic ticks scheduled by the simulator itself.
    Timer = 1,

    /// Deliveries crossing the simulated network.
    Network = 2,
}

/// All events the engine can schedule.
///
/// Events are **passive data** describing something due to happen; the
/// engine matches on the popped event and mutates state accordingly. They
/// deliberately carry ids only, never references, so the queue is trivially
/// snapshot-friendly and cycle-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    // ═══════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════
    /// Advance every active flow by one bandwidth-sharing tick.
    NetworkTick,

    /// Grant CPU time slices on one node's virtual OS.
    OsTick { node: NodeId },

    /// Run one distance-vector exchange round.
    DvExchange,

    /// Evaluate demand-driven scaling thresholds on every node.
    ScalingCheck,

    // ═══════════════════════════════════════════════════════════════════
    // Device completions (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════
    /// An asynchronous disk ticket on `node` reached its commit time.
    DiskIoComplete { node: NodeId, ticket: IoTicketId },

    // ═══════════════════════════════════════════════════════════════════
    // Network deliveries (priority: Network)
    // ═══════════════════════════════════════════════════════════════════
    /// A chunk finished its link latency and landed on `to`.
    ChunkArrived {
        transfer: TransferId,
        chunk: ChunkId,
        from: NodeId,
        to: NodeId,
    },
}

impl SimEvent {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            SimEvent::DiskIoComplete { .. } => EventPriority::Internal,
            SimEvent::NetworkTick
            | SimEvent::OsTick { .. }
            | SimEvent::DvExchange
            | SimEvent::ScalingCheck => EventPriority::Timer,
            SimEvent::ChunkArrived { .. } => EventPriority::Network,
        }
    }

    /// Event type name for telemetry and traces.
    pub fn type_name(&self) -> &'static str {
        match self {
            SimEvent::NetworkTick => "NetworkTick",
            SimEvent::OsTick { .. } => "OsTick",
            SimEvent::DvExchange => "DvExchange",
            SimEvent::ScalingCheck => "ScalingCheck",
            SimEvent::DiskIoComplete { .. } => "DiskIoComplete",
            SimEvent::ChunkArrived { .. } => "ChunkArrived",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_run_before_ticks_and_deliveries() {
        assert!(EventPriority::Internal < EventPriority::Timer);
        assert!(EventPriority::Timer < EventPriority::Network);
        assert_eq!(
            SimEvent::DiskIoComplete {
                node: NodeId(0),
                ticket: IoTicketId(1)
            }
            .priority(),
            EventPriority::Internal
        );
        assert_eq!(SimEvent::NetworkTick.priority(), EventPriority::Timer);
    }
}
