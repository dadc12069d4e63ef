//! Error taxonomy shared by every public simulator operation.

use crate::ids::{FileId, NodeId};

/// Error returned by simulator operations.
///
/// Admission errors (`NoSpace`, `Oom`, `NoRoute`, `DuplicateNode`,
/// `InvalidArgument`, `UnknownNode`) are surfaced at the call site with no
/// state change. Runtime errors (`DiskOffline`, `NodeOffline`,
/// `ChecksumMismatch`, `RouteLost`, `ReplicaSyncFailed`) are logged as
/// events and fail only the affected transfer; unrelated state is untouched.
/// None are fatal to the simulator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("no route between {src} and {dst}")]
    NoRoute { src: NodeId, dst: NodeId },

    #[error("insufficient disk capacity for {needed} bytes ({available} available)")]
    NoSpace { needed: u64, available: u64 },

    #[error("insufficient memory for {needed} bytes ({available} available)")]
    Oom { needed: u64, available: u64 },

    #[error("disk is offline")]
    DiskOffline,

    #[error("node {0} is offline")]
    NodeOffline(NodeId),

    #[error("checksum mismatch reading chunk {chunk} of {file}")]
    ChecksumMismatch { file: FileId, chunk: u32 },

    #[error("route lost for in-flight transfer")]
    RouteLost,

    #[error("replica sync of {file} failed: {reason}")]
    ReplicaSyncFailed { file: FileId, reason: String },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SimError {
    /// Stable machine-readable code, matching the wire names consumed by
    /// shells and control-plane wrappers.
    pub fn code(&self) -> &'static str {
        match self {
            SimError::NoRoute { .. } => "no_route",
            SimError::NoSpace { .. } => "no_space",
            SimError::Oom { .. } => "oom",
            SimError::DiskOffline => "disk_offline",
            SimError::NodeOffline(_) => "node_offline",
            SimError::ChecksumMismatch { .. } => "checksum_mismatch",
            SimError::RouteLost => "route_lost",
            SimError::ReplicaSyncFailed { .. } => "replica_sync_failed",
            SimError::UnknownNode(_) => "unknown_node",
            SimError::DuplicateNode(_) => "duplicate_node",
            SimError::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// Whether this is an admission error (rejected before any state change).
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            SimError::NoRoute { .. }
                | SimError::NoSpace { .. }
                | SimError::Oom { .. }
                | SimError::UnknownNode(_)
                | SimError::DuplicateNode(_)
                | SimError::InvalidArgument(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            SimError::NoRoute {
                src: NodeId(0),
                dst: NodeId(1)
            }
            .code(),
            "no_route"
        );
        assert_eq!(SimError::DiskOffline.code(), "disk_offline");
        assert_eq!(SimError::RouteLost.code(), "route_lost");
    }

    #[test]
    fn admission_classification() {
        assert!(SimError::DuplicateNode("a".into()).is_admission());
        assert!(!SimError::NodeOffline(NodeId(3)).is_admission());
    }
}
