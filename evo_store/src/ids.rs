//! Opaque identifiers: sector ids, sensor ids, consumer ids.

use static_assertions::const_assert;

/// Sentinel raw value meaning "no sector" wherever a [`SectorId`] is
/// stored or compared.
const NIL_RAW: u32 = u32::MAX;

/// Opaque sector identifier.
///
/// Backed by `u32` so a single type covers both 16-bit-sufficient pools
/// (the 64 KiB / 2,048-sector constrained target) and larger hosts. The
/// sentinel [`SectorId::NIL`] means "no sector" and must never collide
/// with a real pool index; `const_assert!` below pins that relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorId(u32);

const_assert!(NIL_RAW > 0);

impl SectorId {
    /// The "no sector" sentinel.
    pub const NIL: SectorId = SectorId(NIL_RAW);

    /// Wrap a pool index. Panics if `idx` collides with the `NIL` sentinel
    /// — this can only happen on a pool larger than 2^32-1 sectors, which
    /// is never a valid configuration.
    #[inline]
    pub fn new(idx: usize) -> Self {
        let raw = idx as u32;
        assert!(raw != NIL_RAW, "pool index collides with NIL sentinel");
        SectorId(raw)
    }

    /// The underlying pool index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// True if this is the `NIL` sentinel.
    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == NIL_RAW
    }
}

impl Default for SectorId {
    /// The `NIL` sentinel, so a freshly-initialized cursor with no RAM
    /// position starts "at the chain head" rather than at index 0 of a
    /// sector id 0 might otherwise alias.
    fn default() -> Self {
        SectorId::NIL
    }
}

impl std::fmt::Display for SectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_nil() {
            write!(f, "NIL")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Sensor identifier. Small integer drawn from a statically-known,
/// build-time enumeration.
pub type SensorId = u16;

/// Consumer (upload destination) identifier, in `[0, K)` for the
/// build-time-fixed consumer count `K`.
pub type ConsumerId = usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_distinguishable() {
        assert!(SectorId::NIL.is_nil());
        assert!(!SectorId::new(0).is_nil());
        assert!(!SectorId::new(2047).is_nil());
    }

    #[test]
    fn round_trips_index() {
        let id = SectorId::new(17);
        assert_eq!(id.index(), 17);
    }
}
