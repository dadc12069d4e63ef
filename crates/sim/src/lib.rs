//! Deterministic discrete-event scheduler for CloudSim.
//!
//! The scheduler is the sole driver of simulated time. All state mutations
//! in the simulator happen while handling an event popped from the queue;
//! long-running work never suspends mid-callback, it schedules a follow-up
//! event instead.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Scheduler                          │
//! │                                                          │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │      Event queue (BTreeMap<EventKey, SimEvent>)     │ │
//! │  │      Ordered by: time, priority, sequence           │ │
//! │  └──────────────────────────┬──────────────────────────┘ │
//! │                             │ pop_next(until)            │
//! │                             ▼                            │
//! │        engine dispatch → schedules follow-up events      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Determinism contract
//!
//! Given identical inputs and seed, two runs yield identical event order and
//! identical observable state. Ties at the same time are broken by priority,
//! then by a monotonically increasing sequence number assigned at schedule
//! time (FIFO within a tick). `now` never moves backward.

mod event;
mod event_log;
mod scheduler;

pub use event::{EventPriority, SimEvent};
pub use event_log::{EventKind, EventLog, EventRecord};
pub use scheduler::{EventKey, Scheduler};
