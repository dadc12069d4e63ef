//! Core types for the CloudSim storage-fabric simulator.
//!
//! This crate provides the foundational types used throughout the simulator:
//!
//! - **Identifiers**: `NodeId`, `LinkId`, `TransferId`, `FileId`, etc.
//! - **Checksums**: 32-byte Blake3 digests for chunk integrity
//! - **Units**: decimal byte/bandwidth/latency parsing and formatting
//! - **Errors**: the `SimError` taxonomy surfaced by every public operation
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crates, making it the foundation layer. Entities reference each other by
//! stable integer ids, never by pointer, so the whole simulator state is
//! snapshot-friendly.

mod checksum;
mod error;
mod ids;
mod units;
mod zone;

pub use checksum::Checksum;
pub use error::SimError;
pub use ids::{
    ChunkId, EventHandle, FileId, IoTicketId, LinkId, NodeId, NodeIp, Pid, TransferId,
};
pub use units::{
    format_bandwidth, format_bytes, parse_bandwidth, parse_latency_ms, parse_size,
};
pub use zone::{zone_region, ZONE_CATALOG};
