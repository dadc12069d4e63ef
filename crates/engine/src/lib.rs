//! CloudSim engine: transfers, replica clusters, and the controller surface.
//!
//! This crate ties the simulator together. The [`Controller`] owns the
//! scheduler, the node and link arenas, the transfer engine, and the cluster
//! manager, and exposes the operation set consumed by external shells and
//! control planes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Controller                         │
//! │                                                           │
//! │  Scheduler ──► dispatch(SimEvent)                         │
//! │      ▲             │                                      │
//! │      │             ├─ NetworkTick ──► fair-share flows    │
//! │      │             ├─ OsTick ───────► CPU + device submit │
//! │      │             ├─ DiskIoComplete► chunk commits       │
//! │      │             ├─ ChunkArrived ─► hop advancement     │
//! │      │             ├─ DvExchange ───► routing convergence │
//! │      │             └─ ScalingCheck ─► replica spawns      │
//! │      │                                                    │
//! │      └── handlers schedule follow-up events ◄─────────────┘
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread; determinism comes from the scheduler's
//! total event order and from keeping every iterated collection ordered.

mod cluster;
mod config;
mod controller;
mod snapshot;
mod telemetry;
mod transfer;

pub use cluster::SpawnReason;
pub use config::{ScalingConfig, SimConfig};
pub use controller::{
    Controller, LinkInfo, NodeInfo, NodeOptions, NodeReport, OsReport, StoredFileInfo,
    TransferView, UsageInfo,
};
pub use telemetry::{StepReport, TelemetryCounters, TelemetrySnapshot};
pub use transfer::{Transfer, TransferKind, TransferState, TransferTable};
