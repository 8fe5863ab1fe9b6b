//! Chain Table: per-sector metadata kept parallel to the sector pool.
//!
//! Sectors themselves hold nothing but payload bytes (§3 of the storage
//! design keeps next-pointers out of the 32-byte budget). Every sector's
//! owner, kind, link, and flags live here instead, indexed by the same
//! [`SectorId`] the pool uses.

use crate::ids::{SectorId, SensorId};
use crate::record::SensorKind;
use parking_lot::Mutex;

bitflags::bitflags! {
    /// Independent per-sector boolean flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChainFlags: u8 {
        /// Sector is currently part of some sensor's chain.
        const IN_USE      = 0b001;
        /// At least one consumer has read, but not acknowledged, this
        /// sector's records.
        const PENDING_ACK = 0b010;
        /// Sector's records have been spooled to disk and are awaiting
        /// the RAM-side free once every consumer has drained them.
        const SPOOLED     = 0b100;
    }
}

#[derive(Debug, Clone, Copy)]
struct ChainEntry {
    next: SectorId,
    owner: SensorId,
    kind: SensorKind,
    created_ms: u64,
    flags: ChainFlags,
}

impl ChainEntry {
    const EMPTY: ChainEntry = ChainEntry {
        next: SectorId::NIL,
        owner: 0,
        kind: SensorKind::Tsd,
        created_ms: 0,
        flags: ChainFlags::empty(),
    };
}

/// Error produced when `traverse` detects a broken chain invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    /// Visit count exceeded `pool_size` without reaching `NIL`.
    Cycle,
    /// A visited sector's `owner` did not match the chain's declared owner.
    OwnerMismatch { at: SectorId, expected: SensorId, found: SensorId },
    /// A visited sector was not marked `in_use`.
    FreedSector { at: SectorId },
}

/// The one global chain lock: guards every chain-entry mutation.
///
/// Acquisition order is `sensor.lock -> chain_lock -> pool_lock`; code
/// holding only this lock (no pool operation pending) may take it
/// standalone.
pub struct ChainTable {
    entries: Mutex<Vec<ChainEntry>>,
}

impl ChainTable {
    /// Create a chain table sized to match a [`crate::pool::SectorPool`]
    /// of the same `pool_size`. All entries start cleared.
    pub fn new(pool_size: usize) -> Self {
        Self {
            entries: Mutex::new(vec![ChainEntry::EMPTY; pool_size]),
        }
    }

    /// Initialize a freshly-allocated sector's entry: `next = NIL`,
    /// `in_use = true`, all other flags clear.
    pub fn init_entry(&self, id: SectorId, owner: SensorId, kind: SensorKind, created_ms: u64) {
        let mut entries = self.entries.lock();
        entries[id.index()] = ChainEntry {
            next: SectorId::NIL,
            owner,
            kind,
            created_ms,
            flags: ChainFlags::IN_USE,
        };
    }

    /// Clear a freed sector's entry back to the all-zero state.
    pub fn clear_entry(&self, id: SectorId) {
        let mut entries = self.entries.lock();
        entries[id.index()] = ChainEntry::EMPTY;
    }

    /// The sector this one points to, or `NIL` at the chain's tail.
    pub fn next_of(&self, id: SectorId) -> SectorId {
        self.entries.lock()[id.index()].next
    }

    /// Link `s -> t`. Caller guarantees `owner(s) == owner(t)`; checked in
    /// debug builds only, matching the pool/chain fail-stop philosophy of
    /// trusting callers that already hold `sensor.lock`.
    pub fn set_next(&self, s: SectorId, t: SectorId) {
        let mut entries = self.entries.lock();
        if !t.is_nil() {
            debug_assert_eq!(
                entries[s.index()].owner,
                entries[t.index()].owner,
                "cross-sensor chain edge {s} -> {t}"
            );
        }
        entries[s.index()].next = t;
    }

    /// The sensor that owns this sector.
    pub fn owner_of(&self, id: SectorId) -> SensorId {
        self.entries.lock()[id.index()].owner
    }

    /// The record kind this sector was allocated for.
    pub fn kind_of(&self, id: SectorId) -> SensorKind {
        self.entries.lock()[id.index()].kind
    }

    /// The allocation timestamp recorded at `init_entry`.
    pub fn created_ms(&self, id: SectorId) -> u64 {
        self.entries.lock()[id.index()].created_ms
    }

    /// Test whether `flag` is set on `id`.
    pub fn flag_get(&self, id: SectorId, flag: ChainFlags) -> bool {
        self.entries.lock()[id.index()].flags.contains(flag)
    }

    /// Set or clear `flag` on `id`.
    pub fn flag_set(&self, id: SectorId, flag: ChainFlags, value: bool) {
        let mut entries = self.entries.lock();
        entries[id.index()].flags.set(flag, value);
    }

    /// Walk the chain from `start`, returning the visited sector ids in
    /// order. Aborts with [`ChainFault`] on cycle (more than `max_hops`
    /// visits), owner mismatch, or a reference into a freed sector.
    ///
    /// `start == NIL` yields an empty chain, not a fault (an empty
    /// sensor's chain is valid).
    pub fn traverse(
        &self,
        start: SectorId,
        expected_owner: SensorId,
        max_hops: usize,
    ) -> Result<Vec<SectorId>, ChainFault> {
        let entries = self.entries.lock();
        let mut out = Vec::new();
        let mut cur = start;
        while !cur.is_nil() {
            if out.len() > max_hops {
                return Err(ChainFault::Cycle);
            }
            let entry = &entries[cur.index()];
            if !entry.flags.contains(ChainFlags::IN_USE) {
                return Err(ChainFault::FreedSector { at: cur });
            }
            if entry.owner != expected_owner {
                return Err(ChainFault::OwnerMismatch {
                    at: cur,
                    expected: expected_owner,
                    found: entry.owner,
                });
            }
            out.push(cur);
            cur = entry.next;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_link() {
        let table = ChainTable::new(8);
        let a = SectorId::new(0);
        let b = SectorId::new(1);
        table.init_entry(a, 7, SensorKind::Tsd, 1000);
        table.init_entry(b, 7, SensorKind::Tsd, 1001);
        table.set_next(a, b);

        assert_eq!(table.next_of(a), b);
        assert_eq!(table.next_of(b), SectorId::NIL);
        assert_eq!(table.owner_of(a), 7);
        assert_eq!(table.kind_of(b), SensorKind::Tsd);
    }

    #[test]
    fn traverse_empty_chain_is_ok() {
        let table = ChainTable::new(4);
        let chain = table.traverse(SectorId::NIL, 3, 4).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn traverse_walks_in_order() {
        let table = ChainTable::new(4);
        let ids: Vec<SectorId> = (0..3).map(SectorId::new).collect();
        for (i, &id) in ids.iter().enumerate() {
            table.init_entry(id, 5, SensorKind::Evt, 100 + i as u64);
        }
        table.set_next(ids[0], ids[1]);
        table.set_next(ids[1], ids[2]);

        let chain = table.traverse(ids[0], 5, 4).unwrap();
        assert_eq!(chain, ids);
    }

    #[test]
    fn traverse_detects_owner_mismatch() {
        let table = ChainTable::new(4);
        let a = SectorId::new(0);
        let b = SectorId::new(1);
        table.init_entry(a, 1, SensorKind::Tsd, 0);
        table.init_entry(b, 2, SensorKind::Tsd, 0);
        table.set_next(a, b);

        let err = table.traverse(a, 1, 4).unwrap_err();
        assert_eq!(
            err,
            ChainFault::OwnerMismatch { at: b, expected: 1, found: 2 }
        );
    }

    #[test]
    fn traverse_detects_freed_sector() {
        let table = ChainTable::new(4);
        let a = SectorId::new(0);
        let b = SectorId::new(1);
        table.init_entry(a, 1, SensorKind::Tsd, 0);
        table.init_entry(b, 1, SensorKind::Tsd, 0);
        table.set_next(a, b);
        table.clear_entry(b);

        let err = table.traverse(a, 1, 4).unwrap_err();
        assert_eq!(err, ChainFault::FreedSector { at: b });
    }

    #[test]
    fn traverse_detects_cycle() {
        let table = ChainTable::new(4);
        let a = SectorId::new(0);
        let b = SectorId::new(1);
        table.init_entry(a, 1, SensorKind::Tsd, 0);
        table.init_entry(b, 1, SensorKind::Tsd, 0);
        table.set_next(a, b);
        table.set_next(b, a);

        let err = table.traverse(a, 1, 4).unwrap_err();
        assert_eq!(err, ChainFault::Cycle);
    }

    #[test]
    fn flags_round_trip() {
        let table = ChainTable::new(2);
        let a = SectorId::new(0);
        table.init_entry(a, 1, SensorKind::Tsd, 0);
        assert!(table.flag_get(a, ChainFlags::IN_USE));
        assert!(!table.flag_get(a, ChainFlags::PENDING_ACK));

        table.flag_set(a, ChainFlags::PENDING_ACK, true);
        assert!(table.flag_get(a, ChainFlags::PENDING_ACK));
        table.flag_set(a, ChainFlags::PENDING_ACK, false);
        assert!(!table.flag_get(a, ChainFlags::PENDING_ACK));
    }
}
