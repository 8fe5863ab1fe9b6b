//! Sensor Control Block: per-sensor mutable state.
//!
//! One [`SensorControlBlock`] exists per configured sensor. Its single
//! [`parking_lot::Mutex`] guards the RAM chain endpoints, the write
//! offset, every consumer's read/pending/disk cursor, and the per-sensor
//! disk-direct staging buffer — everything §3 of the storage design
//! calls "SCB" lives behind this one lock.

use crate::disk::DiskPos;
use crate::ids::{ConsumerId, SectorId, SensorId};
use crate::record::{SectorBytes, SensorKind, EVT_PAIRS_PER_SECTOR, TSD_VALUES_PER_SECTOR};
use evo_common::consts::SECTOR_SIZE;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Immutable per-sensor configuration, fixed at `configure_sensor` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// Sample period in milliseconds. Always 0 for `Evt`; always `> 0` for
    /// `Tsd` (a zero period is rejected at `configure_sensor`, §7).
    pub sample_period_ms: u64,
}

/// Position of the next record a consumer would read, independently in
/// each tier. `ram_sector == SectorId::NIL` means "start at the chain
/// head" (or the chain is presently exhausted for this consumer); disk
/// position resolution is lazy (`seq: None`) until the first disk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    pub ram_sector: SectorId,
    pub ram_index: u32,
    pub disk: DiskPos,
}

impl CursorState {
    pub const START: CursorState = CursorState {
        ram_sector: SectorId::NIL,
        ram_index: 0,
        disk: DiskPos::START,
    };
}

/// Per-(sensor, consumer) state: independent read/pending/disk cursors.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerState {
    pub read_cursor: CursorState,
    pub pending_count: u32,
    pub pending_start: CursorState,
}

impl Default for ConsumerState {
    fn default() -> Self {
        ConsumerState {
            read_cursor: CursorState::START,
            pending_count: 0,
            pending_start: CursorState::START,
        }
    }
}

/// Accumulates a partial record while the sensor is direct-to-disk
/// routed (§4.7). Logically "the tail" for the disk tier: filled one
/// record at a time, flushed as a whole block once full or at shutdown.
#[derive(Debug, Clone, Copy)]
pub struct DiskBuffer {
    pub active: bool,
    pub bytes: SectorBytes,
    pub filled: u32,
    pub first_utc_ms: u64,
    pub last_utc_ms: u64,
}

impl Default for DiskBuffer {
    fn default() -> Self {
        DiskBuffer {
            active: false,
            bytes: [0u8; SECTOR_SIZE],
            filled: 0,
            first_utc_ms: 0,
            last_utc_ms: 0,
        }
    }
}

impl DiskBuffer {
    /// Records the buffer holds when full, for `kind`.
    pub fn capacity(kind: SensorKind) -> u32 {
        kind.records_per_sector()
    }

    pub fn is_full(&self, kind: SensorKind) -> bool {
        self.filled >= Self::capacity(kind)
    }

    pub fn reset(&mut self) {
        *self = DiskBuffer::default();
    }
}

pub(crate) struct ScbInner {
    pub head: SectorId,
    pub tail: SectorId,
    /// Bytes filled in `tail`: for TSD this includes the 8-byte anchor
    /// header once a tail is allocated; for EVT it is a plain byte count.
    pub write_offset: usize,
    pub consumers: Vec<ConsumerState>,
    pub disk_buffer: DiskBuffer,
    /// Most recently written value for this sensor, used by
    /// `write_event_with_location` to re-stamp a location sensor's last
    /// known reading under a shared timestamp.
    pub last_value: Option<i32>,
}

impl ScbInner {
    fn new(consumer_count: usize) -> Self {
        ScbInner {
            head: SectorId::NIL,
            tail: SectorId::NIL,
            write_offset: 0,
            consumers: vec![ConsumerState::default(); consumer_count],
            disk_buffer: DiskBuffer::default(),
            last_value: None,
        }
    }

    /// Records currently filled in the RAM tail (0 if there is no tail).
    pub fn tail_filled(&self, kind: SensorKind) -> u32 {
        if self.tail.is_nil() {
            return 0;
        }
        match kind {
            SensorKind::Tsd => ((self.write_offset.saturating_sub(8)) / 4) as u32,
            SensorKind::Evt => (self.write_offset / 12) as u32,
        }
    }
}

/// An RAII guard around a sensor's lock that also records, in an atomic
/// visible without locking, the instant the lock was last taken — the
/// lock-hold telemetry an external watchdog loop polls (§4.10).
pub struct ScbGuard<'a> {
    guard: MutexGuard<'a, ScbInner>,
    taken_at: &'a AtomicU64,
}

impl<'a> std::ops::Deref for ScbGuard<'a> {
    type Target = ScbInner;
    fn deref(&self) -> &ScbInner {
        &self.guard
    }
}

impl<'a> std::ops::DerefMut for ScbGuard<'a> {
    fn deref_mut(&mut self) -> &mut ScbInner {
        &mut self.guard
    }
}

impl<'a> Drop for ScbGuard<'a> {
    fn drop(&mut self) {
        self.taken_at.store(0, Ordering::Release);
    }
}

/// Per-sensor control block: configuration, chain state, and every
/// consumer's cursor, all behind one lock (§3, §5).
pub struct SensorControlBlock {
    pub config: SensorConfig,
    inner: Mutex<ScbInner>,
    lock_taken_at_ms: AtomicU64,
    /// Set once `validate_chain` detects corruption; the sensor is then
    /// quarantined and every further call fails with `ChainCorrupt`.
    active: AtomicBool,
}

impl SensorControlBlock {
    pub fn new(config: SensorConfig, consumer_count: usize) -> Self {
        SensorControlBlock {
            config,
            inner: Mutex::new(ScbInner::new(consumer_count)),
            lock_taken_at_ms: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.config.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Acquire the sensor lock, recording `now_ms` as the hold's start
    /// for lock-hold-age diagnostics.
    pub fn lock(&self, now_ms: u64) -> ScbGuard<'_> {
        let guard = self.inner.lock();
        self.lock_taken_at_ms.store(now_ms, Ordering::Release);
        ScbGuard {
            guard,
            taken_at: &self.lock_taken_at_ms,
        }
    }

    /// Age in milliseconds since the lock was last taken, or `None` if
    /// it is not currently held.
    pub fn lock_hold_age_ms(&self, now_ms: u64) -> Option<u64> {
        let taken = self.lock_taken_at_ms.load(Ordering::Acquire);
        if taken == 0 {
            None
        } else {
            Some(now_ms.saturating_sub(taken))
        }
    }
}

// Sanity-check the record-per-sector constants this module assumes still
// match the record layout module.
const _: () = assert!(TSD_VALUES_PER_SECTOR == 6);
const _: () = assert!(EVT_PAIRS_PER_SECTOR == 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_scb_has_empty_chain() {
        let scb = SensorControlBlock::new(
            SensorConfig { kind: SensorKind::Tsd, sample_period_ms: 1000 },
            3,
        );
        let inner = scb.lock(1_000);
        assert!(inner.head.is_nil());
        assert!(inner.tail.is_nil());
        assert_eq!(inner.consumers.len(), 3);
    }

    #[test]
    fn lock_hold_age_tracks_acquisition() {
        let scb = SensorControlBlock::new(
            SensorConfig { kind: SensorKind::Evt, sample_period_ms: 0 },
            1,
        );
        assert_eq!(scb.lock_hold_age_ms(5_000), None);
        let guard = scb.lock(1_000);
        assert_eq!(scb.lock_hold_age_ms(1_500), Some(500));
        drop(guard);
        assert_eq!(scb.lock_hold_age_ms(2_000), None);
    }

    #[test]
    fn mark_inactive_is_observable() {
        let scb = SensorControlBlock::new(
            SensorConfig { kind: SensorKind::Tsd, sample_period_ms: 1000 },
            1,
        );
        assert!(scb.is_active());
        scb.mark_inactive();
        assert!(!scb.is_active());
    }
}
