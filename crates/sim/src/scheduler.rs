//! Event queue with deterministic ordering.

use crate::event::{EventPriority, SimEvent};
use cloudsim_types::{EventHandle, SimError};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

/// Key for ordering events in the queue.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Priority (internal before timer before network)
/// 3. Sequence number (FIFO for same time/priority)
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct EventKey {
    /// When this event should be processed.
    pub time: Duration,
    /// Priority for ordering at the same time.
    pub priority: EventPriority,
    /// Sequence number for deterministic FIFO ordering.
    pub sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Order by time first
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Then by priority (Internal < Timer < Network)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Finally by sequence (FIFO)
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deterministic discrete-event queue.
///
/// Owns the simulated clock. `now` advances to each popped event's time and
/// never moves backward; handlers may schedule new events at `now`, which run
/// later in the same tick in FIFO order.
pub struct Scheduler {
    /// Global event queue, ordered deterministically.
    queue: BTreeMap<EventKey, SimEvent>,

    /// Handle registry for cancellation. Maps handle -> queue key.
    handles: BTreeMap<EventHandle, EventKey>,

    /// Current simulation time.
    now: Duration,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Next cancellation handle.
    next_handle: u64,

    /// Total events dispatched (for telemetry).
    events_processed: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            handles: BTreeMap::new(),
            now: Duration::ZERO,
            sequence: 0,
            next_handle: 0,
            events_processed: 0,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Total events dispatched so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Schedule an event at an absolute simulated time.
    ///
    /// Fails with `invalid_argument` if `time` is in the past. Scheduling at
    /// exactly `now` is allowed and runs within the current tick.
    pub fn schedule_at(&mut self, time: Duration, event: SimEvent) -> Result<EventHandle, SimError> {
        if time < self.now {
            return Err(SimError::InvalidArgument(format!(
                "cannot schedule {} at {:?}, now is {:?}",
                event.type_name(),
                time,
                self.now
            )));
        }
        self.sequence += 1;
        let key = EventKey {
            time,
            priority: event.priority(),
            sequence: self.sequence,
        };
        trace!(event = event.type_name(), time = ?time, seq = key.sequence, "schedule");
        self.queue.insert(key, event);

        self.next_handle += 1;
        let handle = EventHandle(self.next_handle);
        self.handles.insert(handle, key);
        Ok(handle)
    }

    /// Schedule an event relative to the current simulated time.
    pub fn schedule_in(&mut self, delay: Duration, event: SimEvent) -> Result<EventHandle, SimError> {
        self.schedule_at(self.now + delay, event)
    }

    /// Cancel a pending event. Returns `true` if it was still queued.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        match self.handles.remove(&handle) {
            Some(key) => self.queue.remove(&key).is_some(),
            None => false,
        }
    }

    /// Time of the next pending event, if any.
    pub fn peek_time(&self) -> Option<Duration> {
        self.queue.keys().next().map(|k| k.time)
    }

    /// Pop the next event due at or before `until`, advancing `now` to its
    /// time. Returns `None` when the queue is empty or the next event lies
    /// beyond the bound; in the latter case `now` is left untouched so the
    /// caller decides whether to fast-forward.
    pub fn pop_next(&mut self, until: Option<Duration>) -> Option<(EventKey, SimEvent)> {
        let key = *self.queue.keys().next()?;
        if let Some(bound) = until {
            if key.time > bound {
                return None;
            }
        }
        let event = self.queue.remove(&key)?;
        self.now = key.time;
        self.events_processed += 1;
        Some((key, event))
    }

    /// Advance the clock without dispatching (used after a bounded run to
    /// land exactly on the requested time).
    pub fn fast_forward(&mut self, to: Duration) {
        if to > self.now {
            self.now = to;
        }
    }

    /// Reset the clock on restore. Only valid while the queue is empty.
    pub fn restore_now(&mut self, now: Duration) {
        debug_assert!(self.queue.is_empty(), "restore with pending events");
        self.now = now;
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.handles.clear();
    }
}
