//! Identifier newtypes.
//!
//! All cross-entity references in the simulator are ids into arenas owned by
//! the controller. Ids are never reused within a simulator instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena index of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Arena index of an undirected link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Identifier of a file transfer, unique per simulator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Caller-supplied name of a stored file.
///
/// File ids are opaque strings; the simulator never interprets them beyond
/// equality and ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Index of a chunk within a file, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u32);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Process id inside a node's virtual OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

/// Ticket for an asynchronous disk I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IoTicketId(pub u64);

impl fmt::Display for IoTicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io{}", self.0)
    }
}

/// Cancellation handle for a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(pub u64);

/// Simulated IPv4-style address, allocated deterministically as `10.0.x.y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIp {
    pub third_octet: u8,
    pub fourth_octet: u8,
}

impl NodeIp {
    /// Address for the nth node to join the fabric (0-based).
    ///
    /// Hosts cycle through `.1`..`.254` in the fourth octet before bumping
    /// the third, matching conventional subnet host numbering.
    pub fn from_index(index: u32) -> Self {
        Self {
            third_octet: (index / 254) as u8,
            fourth_octet: (index % 254 + 1) as u8,
        }
    }
}

impl fmt::Display for NodeIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "10.0.{}.{}", self.third_octet, self.fourth_octet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_allocation_is_sequential() {
        assert_eq!(NodeIp::from_index(0).to_string(), "10.0.0.1");
        assert_eq!(NodeIp::from_index(1).to_string(), "10.0.0.2");
        assert_eq!(NodeIp::from_index(253).to_string(), "10.0.0.254");
        assert_eq!(NodeIp::from_index(254).to_string(), "10.0.1.1");
    }

    #[test]
    fn ids_order_by_value() {
        assert!(NodeId(1) < NodeId(2));
        assert!(TransferId(9) < TransferId(10));
        assert!(ChunkId(0) < ChunkId(1));
    }
}
