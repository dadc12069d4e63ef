//! Append-only, bounded event log for telemetry.
//!
//! Every controller operation and every observable transfer/cluster/routing
//! side effect appends one entry. The log is a ring: once `capacity` entries
//! exist, the oldest are dropped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    NodeFailed,
    NodeRestored,
    LinkAdded,
    LinkRemoved,
    LinkFailed,
    LinkRestored,
    RouteRecomputed,
    TransferStarted,
    ChunkCommitted,
    TransferCompleted,
    TransferFailed,
    TransferAborted,
    ReplicaSyncFailed,
    ReplicaSpawned,
    CorruptionInjected,
    ChunkRecovered,
    SnapshotRestored,
}

impl EventKind {
    /// Wire name, identical to the serde rendering.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NodeAdded => "node_added",
            EventKind::NodeRemoved => "node_removed",
            EventKind::NodeFailed => "node_failed",
            EventKind::NodeRestored => "node_restored",
            EventKind::LinkAdded => "link_added",
            EventKind::LinkRemoved => "link_removed",
            EventKind::LinkFailed => "link_failed",
            EventKind::LinkRestored => "link_restored",
            EventKind::RouteRecomputed => "route_recomputed",
            EventKind::TransferStarted => "transfer_started",
            EventKind::ChunkCommitted => "chunk_committed",
            EventKind::TransferCompleted => "transfer_completed",
            EventKind::TransferFailed => "transfer_failed",
            EventKind::TransferAborted => "transfer_aborted",
            EventKind::ReplicaSyncFailed => "replica_sync_failed",
            EventKind::ReplicaSpawned => "replica_spawned",
            EventKind::CorruptionInjected => "corruption_injected",
            EventKind::ChunkRecovered => "chunk_recovered",
            EventKind::SnapshotRestored => "snapshot_restored",
        }
    }
}

/// One log entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Simulated time of the event, fractional seconds.
    pub time_secs: f64,
    pub kind: EventKind,
    /// Entity that caused the event (node name, transfer id, ...).
    pub actor: String,
    /// Entity acted upon, when distinct from the actor.
    pub target: Option<String>,
    /// Free-form key/value detail, ordered for deterministic comparison.
    pub fields: Vec<(String, String)>,
}

/// Bounded ring of event records.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<EventRecord>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(
        &mut self,
        now: Duration,
        kind: EventKind,
        actor: impl Into<String>,
        target: Option<String>,
        fields: Vec<(String, String)>,
    ) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EventRecord {
            time_secs: now.as_secs_f64(),
            kind,
            actor: actor.into(),
            target,
            fields,
        });
    }

    /// Most recent `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<EventRecord> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &EventRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace contents from a snapshot tail.
    pub fn restore(&mut self, records: Vec<EventRecord>) {
        self.entries.clear();
        for record in records.into_iter() {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_n(log: &mut EventLog, n: usize) {
        for i in 0..n {
            log.push(
                Duration::from_millis(i as u64),
                EventKind::TransferStarted,
                format!("t{i}"),
                None,
                vec![],
            );
        }
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut log = EventLog::new(3);
        push_n(&mut log, 5);
        let tail = log.tail(10);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].actor, "t2", "oldest surviving entry");
        assert_eq!(tail[2].actor, "t4");
    }

    #[test]
    fn tail_returns_newest_in_order() {
        let mut log = EventLog::new(10);
        push_n(&mut log, 4);
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].actor, "t2");
        assert_eq!(tail[1].actor, "t3");
    }

    #[test]
    fn kind_names_match_wire_format() {
        assert_eq!(EventKind::RouteRecomputed.as_str(), "route_recomputed");
        let json = serde_json::to_string(&EventKind::TransferCompleted).unwrap();
        assert_eq!(json, "\"transfer_completed\"");
    }
}
