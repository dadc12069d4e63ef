//! Per-node building blocks: virtual disk, virtual OS, and the storage node
//! composing them.
//!
//! Nothing in this crate schedules events directly. Disk operations hand back
//! a ticket and a delay; OS syscalls hand back process ids and transitions.
//! The engine owns the scheduler and converts these into `DiskIoComplete` /
//! `OsTick` events, which is what keeps every component snapshot-friendly
//! and the whole simulator single-threaded.

mod disk;
mod node;
mod os;

pub use disk::{ChunkRecord, DiskConfig, IoOutcome, VirtualDisk};
pub use node::{NodeConfig, NodePerfCounters, StorageNode};
pub use os::{
    DeviceKind, OsConfig, ProcessKind, ProcessState, SubmitOutcome, SyscallKind, VirtualOs,
};
