//! TSD and EVT record packing within a single 32-byte sector payload.
//!
//! Sectors never carry anything but record bytes — no next-pointer, no
//! owner, no kind tag. Both layouts below pack to exactly
//! [`evo_common::consts::SECTOR_SIZE`] bytes, for a 75% payload-to-total
//! efficiency (24 of 32 bytes carry data).

use evo_common::consts::SECTOR_SIZE;
use static_assertions::const_assert_eq;

const_assert_eq!(SECTOR_SIZE, 32);

/// Raw sector payload bytes.
pub type SectorBytes = [u8; SECTOR_SIZE];

/// The two record formats a sensor's chain can hold. Immutable once a
/// sensor is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Time-Series Data: regularly sampled values sharing a `first_utc_ms`
    /// anchor, timestamped by `first_utc_ms + i * sample_period_ms`.
    Tsd,
    /// Event Data: irregular events, each carrying its own timestamp.
    Evt,
}

impl SensorKind {
    /// Records per full sector for this kind (6 for TSD, 2 for EVT).
    pub const fn records_per_sector(self) -> u32 {
        match self {
            SensorKind::Tsd => TSD_VALUES_PER_SECTOR as u32,
            SensorKind::Evt => EVT_PAIRS_PER_SECTOR as u32,
        }
    }

    /// Single-byte tag used in the on-disk block header (`0` = TSD,
    /// `1` = EVT), per the wire format.
    pub const fn wire_tag(self) -> u8 {
        match self {
            SensorKind::Tsd => 0,
            SensorKind::Evt => 1,
        }
    }

    /// Inverse of [`SensorKind::wire_tag`].
    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SensorKind::Tsd),
            1 => Some(SensorKind::Evt),
            _ => None,
        }
    }
}

/// A single decoded (value, timestamp) record, regardless of source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Sample value.
    pub value: i32,
    /// Epoch milliseconds this value was recorded at (derived for TSD,
    /// stored verbatim for EVT).
    pub utc_ms: u64,
}

// ─── TSD layout ─────────────────────────────────────────────────────
//
// bytes 0..8:   first_utc_ms (u64 LE)
// bytes 8..32:  six 4-byte LE i32 values, value i at offset 8 + 4*i

/// TSD values held per full sector.
pub const TSD_VALUES_PER_SECTOR: usize = 6;
const TSD_HEADER_BYTES: usize = 8;
const TSD_VALUE_BYTES: usize = 4;

const_assert_eq!(
    TSD_HEADER_BYTES + TSD_VALUES_PER_SECTOR * TSD_VALUE_BYTES,
    SECTOR_SIZE
);

/// Write the sector-anchor timestamp for a fresh TSD tail sector.
pub fn tsd_write_first_utc(buf: &mut SectorBytes, first_utc_ms: u64) {
    buf[0..8].copy_from_slice(&first_utc_ms.to_le_bytes());
}

/// Read the sector-anchor timestamp.
pub fn tsd_read_first_utc(buf: &SectorBytes) -> u64 {
    u64::from_le_bytes(buf[0..8].try_into().unwrap())
}

/// Write the `index`-th value (0-based, `< TSD_VALUES_PER_SECTOR`).
pub fn tsd_write_value(buf: &mut SectorBytes, index: usize, value: i32) {
    debug_assert!(index < TSD_VALUES_PER_SECTOR);
    let off = TSD_HEADER_BYTES + index * TSD_VALUE_BYTES;
    buf[off..off + TSD_VALUE_BYTES].copy_from_slice(&value.to_le_bytes());
}

/// Read the `index`-th value.
pub fn tsd_read_value(buf: &SectorBytes, index: usize) -> i32 {
    debug_assert!(index < TSD_VALUES_PER_SECTOR);
    let off = TSD_HEADER_BYTES + index * TSD_VALUE_BYTES;
    i32::from_le_bytes(buf[off..off + TSD_VALUE_BYTES].try_into().unwrap())
}

/// Decode the `index`-th TSD record, deriving its timestamp from the
/// sector anchor and the sensor's sample period.
pub fn tsd_read_record(buf: &SectorBytes, index: usize, sample_period_ms: u64) -> Record {
    let first_utc_ms = tsd_read_first_utc(buf);
    Record {
        value: tsd_read_value(buf, index),
        utc_ms: first_utc_ms + (index as u64) * sample_period_ms,
    }
}

// ─── EVT layout ─────────────────────────────────────────────────────
//
// bytes 0..4:   value0  (i32 LE)
// bytes 4..12:  utc_ms0 (u64 LE)
// bytes 12..16: value1  (i32 LE)
// bytes 16..24: utc_ms1 (u64 LE)
// bytes 24..32: reserved

/// EVT (value, timestamp) pairs held per full sector.
pub const EVT_PAIRS_PER_SECTOR: usize = 2;
const EVT_PAIR_BYTES: usize = 12;
const EVT_RESERVED_BYTES: usize = 8;

const_assert_eq!(
    EVT_PAIRS_PER_SECTOR * EVT_PAIR_BYTES + EVT_RESERVED_BYTES,
    SECTOR_SIZE
);

/// Write the `pair_index`-th (value, timestamp) pair (0 or 1).
pub fn evt_write_pair(buf: &mut SectorBytes, pair_index: usize, value: i32, utc_ms: u64) {
    debug_assert!(pair_index < EVT_PAIRS_PER_SECTOR);
    let off = pair_index * EVT_PAIR_BYTES;
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
    buf[off + 4..off + 12].copy_from_slice(&utc_ms.to_le_bytes());
}

/// Read the `pair_index`-th (value, timestamp) pair.
pub fn evt_read_pair(buf: &SectorBytes, pair_index: usize) -> Record {
    debug_assert!(pair_index < EVT_PAIRS_PER_SECTOR);
    let off = pair_index * EVT_PAIR_BYTES;
    let value = i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    let utc_ms = u64::from_le_bytes(buf[off + 4..off + 12].try_into().unwrap());
    Record { value, utc_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsd_round_trip() {
        let mut buf: SectorBytes = [0; SECTOR_SIZE];
        tsd_write_first_utc(&mut buf, 1_000_000);
        for i in 0..TSD_VALUES_PER_SECTOR {
            tsd_write_value(&mut buf, i, i as i32 * 10);
        }
        assert_eq!(tsd_read_first_utc(&buf), 1_000_000);
        for i in 0..TSD_VALUES_PER_SECTOR {
            let rec = tsd_read_record(&buf, i, 1000);
            assert_eq!(rec.value, i as i32 * 10);
            assert_eq!(rec.utc_ms, 1_000_000 + (i as u64) * 1000);
        }
    }

    #[test]
    fn evt_round_trip() {
        let mut buf: SectorBytes = [0; SECTOR_SIZE];
        evt_write_pair(&mut buf, 0, 42, 5_000);
        evt_write_pair(&mut buf, 1, -7, 5_050);
        let r0 = evt_read_pair(&buf, 0);
        let r1 = evt_read_pair(&buf, 1);
        assert_eq!(r0, Record { value: 42, utc_ms: 5_000 });
        assert_eq!(r1, Record { value: -7, utc_ms: 5_050 });
    }

    #[test]
    fn kind_wire_tag_round_trips() {
        assert_eq!(SensorKind::from_wire_tag(SensorKind::Tsd.wire_tag()), Some(SensorKind::Tsd));
        assert_eq!(SensorKind::from_wire_tag(SensorKind::Evt.wire_tag()), Some(SensorKind::Evt));
        assert_eq!(SensorKind::from_wire_tag(2), None);
    }
}
