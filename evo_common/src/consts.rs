//! System-wide constants for the EVO storage workspace.
//!
//! Single source of truth for the numeric defaults the storage engine and
//! its host binaries agree on. Imported by all crates — no duplication
//! permitted.

/// Sector payload size in bytes. Fixed at build time; both the TSD and EVT
/// record layouts are defined in terms of this constant.
pub const SECTOR_SIZE: usize = 32;

/// Default sector pool size (sector count) on a constrained host.
pub const DEFAULT_POOL_SIZE: usize = 2_048;

/// Default high-watermark occupancy percentage at which new writes route
/// to disk instead of the pool.
pub const DEFAULT_WATERMARK_PERCENT: u8 = 80;

/// Default per-(consumer, sensor) disk byte cap.
pub const DEFAULT_DISK_BYTE_CAP: u64 = 256 * 1024 * 1024;

/// Default disk file rotation size.
pub const DEFAULT_FILE_ROTATION_BYTES: u64 = 64 * 1024;

/// Fixed number of upload consumers compiled into a build.
pub const DEFAULT_CONSUMER_COUNT: usize = 3;

/// Default root directory for on-disk sensor data.
pub const DEFAULT_DISK_ROOT: &str = "/var/lib/evo_store";

/// Nominal tick rate for the tiered policy engine, in Hz.
pub const TICK_RATE_HZ: u64 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(SECTOR_SIZE > 0);
        assert!(DEFAULT_POOL_SIZE > 0);
        assert!(DEFAULT_WATERMARK_PERCENT > 0 && DEFAULT_WATERMARK_PERCENT <= 100);
        assert!(DEFAULT_DISK_BYTE_CAP >= DEFAULT_FILE_ROTATION_BYTES);
        assert!(DEFAULT_CONSUMER_COUNT > 0);
        assert!(TICK_RATE_HZ > 0);
    }

    #[test]
    fn sector_fits_16_bit_pool() {
        // A 64 KiB pool of 32-byte sectors is exactly 2048 sectors, the
        // threshold at which a 16-bit sector id still suffices.
        assert_eq!(64 * 1024 / SECTOR_SIZE, 2048);
    }
}
