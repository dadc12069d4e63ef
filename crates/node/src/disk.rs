//! Block-level virtual disk with reservation-first accounting.
//!
//! Capacity is claimed up front: a transfer reserves the full file size
//! before any chunk moves, so concurrent transfers can never overcommit a
//! disk. Each committed chunk converts its bytes from reserved to committed.
//!
//! The disk performs no scheduling itself. `begin_write`/`begin_read` return
//! an [`IoTicketId`] plus the simulated latency; the engine schedules a
//! `DiskIoComplete` event and calls [`VirtualDisk::complete_io`] when it
//! fires.

use cloudsim_types::{Checksum, ChunkId, FileId, IoTicketId, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Disk performance model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Fixed positioning cost per I/O.
    pub seek_latency: Duration,
    /// Sustained sequential throughput in bytes per second.
    pub throughput_bytes_per_sec: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            seek_latency: Duration::from_micros(200),
            throughput_bytes_per_sec: 2_000_000_000,
        }
    }
}

/// A committed chunk of a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: ChunkId,
    /// Byte offset of this chunk within the file.
    pub offset: u64,
    pub length: u64,
    pub checksum: Checksum,
    /// Set by fault injection; the next read fails with `checksum_mismatch`.
    pub corrupt: bool,
    /// Simulated time of the commit, fractional seconds.
    pub committed_at_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskFile {
    total_size: u64,
    committed_bytes: u64,
    chunks: BTreeMap<ChunkId, ChunkRecord>,
}

/// An in-flight asynchronous I/O request.
#[derive(Debug, Clone)]
enum PendingIo {
    Write {
        file: FileId,
        chunk: ChunkId,
        offset: u64,
        length: u64,
        checksum: Checksum,
    },
    Read {
        file: FileId,
        chunk: ChunkId,
    },
}

/// Result of a completed I/O ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum IoOutcome {
    Written {
        file: FileId,
        chunk: ChunkId,
        length: u64,
    },
    Read {
        file: FileId,
        chunk: ChunkId,
        length: u64,
        checksum: Checksum,
    },
}

/// Simulated block device.
///
/// Invariant: `committed_bytes + reserved_bytes <= capacity` at all times.
#[derive(Debug, Clone)]
pub struct VirtualDisk {
    capacity: u64,
    committed: u64,
    reserved: u64,
    online: bool,
    config: DiskConfig,
    files: BTreeMap<FileId, DiskFile>,
    pending: BTreeMap<IoTicketId, PendingIo>,
    next_ticket: u64,
}

impl VirtualDisk {
    pub fn new(capacity: u64, config: DiskConfig) -> Self {
        Self {
            capacity,
            committed: 0,
            reserved: 0,
            online: true,
            config,
            files: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_ticket: 0,
        }
    }

    // ── Accounting ───────────────────────────────────────────────────

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity - self.committed - self.reserved
    }

    /// Fraction of capacity claimed, counting reservations. Demand scaling
    /// watches this so pressure is visible before commits land.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.committed + self.reserved) as f64 / self.capacity as f64
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Toggle availability. An offline disk rejects every new ticket with
    /// `disk_offline`; committed state is retained for when the node
    /// recovers.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    // ── Reservations ─────────────────────────────────────────────────

    /// Reserve capacity for an incoming file.
    pub fn reserve(&mut self, file: &FileId, bytes: u64) -> Result<(), SimError> {
        if !self.online {
            return Err(SimError::DiskOffline);
        }
        if bytes == 0 {
            return Err(SimError::InvalidArgument("file size must be positive".into()));
        }
        if self.files.contains_key(file) {
            return Err(SimError::InvalidArgument(format!(
                "file '{file}' already reserved or stored"
            )));
        }
        if self.committed + self.reserved + bytes > self.capacity {
            return Err(SimError::NoSpace {
                needed: bytes,
                available: self.free_bytes(),
            });
        }
        self.reserved += bytes;
        self.files.insert(
            file.clone(),
            DiskFile {
                total_size: bytes,
                committed_bytes: 0,
                chunks: BTreeMap::new(),
            },
        );
        debug!(%file, bytes, reserved = self.reserved, "reserved");
        Ok(())
    }

    /// Release a file entirely: remaining reservation, committed chunks, and
    /// any pending tickets. Returns the cancelled tickets so the caller can
    /// cancel their scheduled completions.
    pub fn release(&mut self, file: &FileId) -> Vec<IoTicketId> {
        let Some(disk_file) = self.files.remove(file) else {
            return Vec::new();
        };
        self.reserved -= disk_file.total_size - disk_file.committed_bytes;
        self.committed -= disk_file.committed_bytes;

        let cancelled: Vec<IoTicketId> = self
            .pending
            .iter()
            .filter(|(_, io)| match io {
                PendingIo::Write { file: f, .. } | PendingIo::Read { file: f, .. } => f == file,
            })
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in &cancelled {
            self.pending.remove(ticket);
        }
        debug!(%file, cancelled = cancelled.len(), "released");
        cancelled
    }

    // ── Asynchronous I/O ─────────────────────────────────────────────

    /// Schedule a chunk commit. Returns the ticket and the simulated latency
    /// until the commit fires.
    pub fn begin_write(
        &mut self,
        file: &FileId,
        chunk: ChunkId,
        offset: u64,
        length: u64,
        checksum: Checksum,
    ) -> Result<(IoTicketId, Duration), SimError> {
        if !self.online {
            return Err(SimError::DiskOffline);
        }
        let disk_file = self
            .files
            .get(file)
            .ok_or_else(|| SimError::InvalidArgument(format!("no reservation for '{file}'")))?;
        if disk_file.chunks.contains_key(&chunk) {
            return Err(SimError::InvalidArgument(format!(
                "chunk {chunk} of '{file}' already committed"
            )));
        }
        if disk_file.committed_bytes + length > disk_file.total_size {
            return Err(SimError::InvalidArgument(format!(
                "write past reservation for '{file}'"
            )));
        }

        let ticket = self.allocate_ticket(PendingIo::Write {
            file: file.clone(),
            chunk,
            offset,
            length,
            checksum,
        });
        Ok((ticket, self.io_latency(length)))
    }

    /// Schedule a chunk read.
    pub fn begin_read(
        &mut self,
        file: &FileId,
        chunk: ChunkId,
    ) -> Result<(IoTicketId, Duration), SimError> {
        if !self.online {
            return Err(SimError::DiskOffline);
        }
        let record = self
            .chunk_record(file, chunk)
            .ok_or_else(|| SimError::InvalidArgument(format!("chunk {chunk} of '{file}' not found")))?;
        let length = record.length;
        let ticket = self.allocate_ticket(PendingIo::Read {
            file: file.clone(),
            chunk,
        });
        Ok((ticket, self.io_latency(length)))
    }

    /// Complete a ticket when its `DiskIoComplete` event fires.
    ///
    /// Writes convert reserved bytes to committed and store the chunk
    /// record. Reads of a corrupt record fail with `checksum_mismatch`.
    pub fn complete_io(&mut self, ticket: IoTicketId, now: Duration) -> Result<IoOutcome, SimError> {
        let io = self
            .pending
            .remove(&ticket)
            .ok_or_else(|| SimError::InvalidArgument(format!("unknown ticket {ticket}")))?;
        if !self.online {
            return Err(SimError::DiskOffline);
        }
        match io {
            PendingIo::Write {
                file,
                chunk,
                offset,
                length,
                checksum,
            } => {
                let disk_file = self
                    .files
                    .get_mut(&file)
                    .ok_or_else(|| SimError::InvalidArgument(format!("'{file}' released mid-write")))?;
                disk_file.committed_bytes += length;
                disk_file.chunks.insert(
                    chunk,
                    ChunkRecord {
                        chunk,
                        offset,
                        length,
                        checksum,
                        corrupt: false,
                        committed_at_secs: now.as_secs_f64(),
                    },
                );
                self.reserved -= length;
                self.committed += length;
                debug_assert!(self.committed + self.reserved <= self.capacity);
                cloudsim_metrics::record_chunk_committed(length);
                Ok(IoOutcome::Written {
                    file,
                    chunk,
                    length,
                })
            }
            PendingIo::Read { file, chunk } => {
                let record = self.chunk_record(&file, chunk).ok_or_else(|| {
                    SimError::InvalidArgument(format!("chunk {chunk} of '{file}' released mid-read"))
                })?;
                if record.corrupt {
                    return Err(SimError::ChecksumMismatch {
                        file,
                        chunk: chunk.0,
                    });
                }
                Ok(IoOutcome::Read {
                    length: record.length,
                    checksum: record.checksum,
                    file,
                    chunk,
                })
            }
        }
    }

    /// Cancel one pending ticket (transfer teardown). Returns `true` if it
    /// was still outstanding.
    pub fn cancel_ticket(&mut self, ticket: IoTicketId) -> bool {
        self.pending.remove(&ticket).is_some()
    }

    /// Drop every pending ticket (node failure). Returns them so the caller
    /// cancels the matching scheduled events.
    pub fn drop_pending(&mut self) -> Vec<IoTicketId> {
        let tickets: Vec<IoTicketId> = self.pending.keys().copied().collect();
        self.pending.clear();
        tickets
    }

    // ── Fault injection ──────────────────────────────────────────────

    /// Flip the corrupt bit on a committed chunk.
    pub fn inject_corruption(&mut self, file: &FileId, chunk: ChunkId) -> Result<(), SimError> {
        let record = self
            .files
            .get_mut(file)
            .and_then(|f| f.chunks.get_mut(&chunk))
            .ok_or_else(|| SimError::InvalidArgument(format!("chunk {chunk} of '{file}' not found")))?;
        record.corrupt = true;
        Ok(())
    }

    /// Replace a corrupt record with trusted bytes from a healthy replica.
    pub fn recover_chunk(
        &mut self,
        file: &FileId,
        chunk: ChunkId,
        checksum: Checksum,
    ) -> Result<(), SimError> {
        let record = self
            .files
            .get_mut(file)
            .and_then(|f| f.chunks.get_mut(&chunk))
            .ok_or_else(|| SimError::InvalidArgument(format!("chunk {chunk} of '{file}' not found")))?;
        record.corrupt = false;
        record.checksum = checksum;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Whether every byte of the file has been committed.
    pub fn has_complete_file(&self, file: &FileId) -> bool {
        self.files
            .get(file)
            .map(|f| f.committed_bytes == f.total_size)
            .unwrap_or(false)
    }

    pub fn chunk_record(&self, file: &FileId, chunk: ChunkId) -> Option<&ChunkRecord> {
        self.files.get(file).and_then(|f| f.chunks.get(&chunk))
    }

    pub fn file_chunks(&self, file: &FileId) -> Option<impl Iterator<Item = &ChunkRecord>> {
        self.files.get(file).map(|f| f.chunks.values())
    }

    /// Iterate stored files as `(id, total size, committed bytes)`.
    pub fn files(&self) -> impl Iterator<Item = (&FileId, u64, u64)> {
        self.files
            .iter()
            .map(|(id, f)| (id, f.total_size, f.committed_bytes))
    }

    // ── Snapshot support ─────────────────────────────────────────────

    /// Recreate a fully committed file during restore.
    pub fn restore_file(
        &mut self,
        file: FileId,
        total_size: u64,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), SimError> {
        let committed: u64 = chunks.iter().map(|c| c.length).sum();
        if self.committed + self.reserved + total_size > self.capacity {
            return Err(SimError::NoSpace {
                needed: total_size,
                available: self.free_bytes(),
            });
        }
        self.committed += committed;
        self.reserved += total_size - committed;
        self.files.insert(
            file,
            DiskFile {
                total_size,
                committed_bytes: committed,
                chunks: chunks.into_iter().map(|c| (c.chunk, c)).collect(),
            },
        );
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn allocate_ticket(&mut self, io: PendingIo) -> IoTicketId {
        self.next_ticket += 1;
        let ticket = IoTicketId(self.next_ticket);
        self.pending.insert(ticket, io);
        ticket
    }

    fn io_latency(&self, bytes: u64) -> Duration {
        let latency = self.config.seek_latency
            + Duration::from_secs_f64(bytes as f64 / self.config.throughput_bytes_per_sec as f64);
        cloudsim_metrics::record_disk_io(latency.as_secs_f64());
        latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(capacity: u64) -> VirtualDisk {
        VirtualDisk::new(capacity, DiskConfig::default())
    }

    fn commit_chunk(d: &mut VirtualDisk, file: &FileId, chunk: u32, len: u64) {
        let sum = Checksum::for_chunk(file.as_str(), chunk);
        let (ticket, _) = d
            .begin_write(file, ChunkId(chunk), chunk as u64 * len, len, sum)
            .expect("write admitted");
        d.complete_io(ticket, Duration::from_secs(1)).expect("commit");
    }

    #[test]
    fn reserve_and_commit_tracks_usage() {
        let mut d = disk(1_000);
        let file = FileId::from("a.bin");
        d.reserve(&file, 600).unwrap();
        assert_eq!(d.reserved_bytes(), 600);
        assert_eq!(d.committed_bytes(), 0);

        commit_chunk(&mut d, &file, 0, 400);
        assert_eq!(d.reserved_bytes(), 200);
        assert_eq!(d.committed_bytes(), 400);

        commit_chunk(&mut d, &file, 1, 200);
        assert!(d.has_complete_file(&file));
        assert_eq!(d.free_bytes(), 400);
    }

    #[test]
    fn capacity_is_enforced_and_release_reclaims() {
        let mut d = disk(1_000);
        let a = FileId::from("a");
        let b = FileId::from("b");
        d.reserve(&a, 800).unwrap();

        let err = d.reserve(&b, 300).unwrap_err();
        assert_eq!(err.code(), "no_space");

        commit_chunk(&mut d, &a, 0, 500);
        d.release(&a);
        assert_eq!(d.committed_bytes(), 0);
        assert_eq!(d.reserved_bytes(), 0);
        d.reserve(&b, 1_000).unwrap();
    }

    #[test]
    fn io_latency_scales_with_size() {
        let mut d = VirtualDisk::new(
            10_000_000,
            DiskConfig {
                seek_latency: Duration::from_millis(1),
                throughput_bytes_per_sec: 1_000_000,
            },
        );
        let file = FileId::from("f");
        d.reserve(&file, 2_000_000).unwrap();
        let (_, small) = d
            .begin_write(&file, ChunkId(0), 0, 1_000, Checksum::ZERO)
            .unwrap();
        let (_, big) = d
            .begin_write(&file, ChunkId(1), 1_000, 1_000_000, Checksum::ZERO)
            .unwrap();
        assert_eq!(small, Duration::from_millis(2));
        assert_eq!(big, Duration::from_millis(1001));
    }

    #[test]
    fn corruption_detection_and_recovery() {
        let mut d = disk(1_000);
        let file = FileId::from("f");
        d.reserve(&file, 100).unwrap();
        commit_chunk(&mut d, &file, 0, 100);

        d.inject_corruption(&file, ChunkId(0)).unwrap();
        let (ticket, _) = d.begin_read(&file, ChunkId(0)).unwrap();
        let err = d.complete_io(ticket, Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.code(), "checksum_mismatch");

        let good = Checksum::for_chunk("f", 0);
        d.recover_chunk(&file, ChunkId(0), good).unwrap();
        let (ticket, _) = d.begin_read(&file, ChunkId(0)).unwrap();
        match d.complete_io(ticket, Duration::from_secs(3)).unwrap() {
            IoOutcome::Read { checksum, .. } => assert_eq!(checksum, good),
            other => panic!("expected read outcome, got {other:?}"),
        }
    }

    #[test]
    fn offline_disk_rejects_new_tickets() {
        let mut d = disk(1_000);
        let file = FileId::from("f");
        d.reserve(&file, 100).unwrap();
        commit_chunk(&mut d, &file, 0, 100);

        d.set_online(false);
        assert_eq!(d.reserve(&FileId::from("g"), 10).unwrap_err().code(), "disk_offline");
        assert_eq!(
            d.begin_read(&file, ChunkId(0)).unwrap_err().code(),
            "disk_offline"
        );

        // Data survives an outage.
        d.set_online(true);
        assert!(d.has_complete_file(&file));
    }

    #[test]
    fn release_cancels_pending_tickets() {
        let mut d = disk(1_000);
        let file = FileId::from("f");
        d.reserve(&file, 500).unwrap();
        let (ticket, _) = d
            .begin_write(&file, ChunkId(0), 0, 500, Checksum::ZERO)
            .unwrap();

        let cancelled = d.release(&file);
        assert_eq!(cancelled, vec![ticket]);
        assert!(d.complete_io(ticket, Duration::ZERO).is_err());
    }
}
