//! Error types for the tiered sensor-data storage engine.

use thiserror::Error;

/// Errors returned by the public [`crate::Engine`] API.
///
/// Pool and chain corruption are fail-stop bugs: anything that would
/// require reporting a broken internal invariant to the caller panics
/// instead (see `pool.rs`/`chain.rs`). The variants below are the ones a
/// well-behaved caller can expect to observe and recover from.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The sector pool is full and the disk path is unavailable (disk
    /// full, disk I/O error, or disk disabled). Surfaced to `write_*`
    /// callers only when both tiers are saturated.
    #[error("sector pool and disk path both exhausted")]
    OutOfMemory,

    /// No record available for this consumer on this sensor. Not an
    /// error condition — callers should treat it as "try again later".
    #[error("no record available")]
    Empty,

    /// An invariant violation was detected while traversing a sensor's
    /// chain: a cycle, an owner mismatch, or a reference to a freed
    /// sector. The sensor is marked inactive by the caller of
    /// `validate_chain`/`traverse`; this error is always surfaced.
    #[error("chain corrupt for sensor {sensor}: {reason}")]
    ChainCorrupt {
        /// The sensor whose chain failed validation.
        sensor: u16,
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// A disk operation failed. The sensor continues in RAM-only mode
    /// until the next successful tick or a manual reset; writes are not
    /// aborted purely because of this as long as RAM capacity remains.
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    /// `write_*` was called after the shutdown flag was observed set.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// `configure_sensor` was called with contradictory parameters.
    #[error("invalid sensor configuration: {0}")]
    InvalidConfiguration(String),

    /// A sensor id was used that was never registered via
    /// `configure_sensor`.
    #[error("sensor {0} is not configured")]
    UnknownSensor(u16),

    /// A consumer id outside the build-time enumeration `[0, K)` was used.
    #[error("consumer {consumer} out of range for K={k}")]
    UnknownConsumer {
        /// The offending consumer id.
        consumer: usize,
        /// The fixed consumer count compiled into this build.
        k: usize,
    },

    /// A disk-store-level format or validation error surfaced directly
    /// (read-path and recovery call sites; `write_*` maps some of these
    /// to `OutOfMemory` instead since a flush failure there is non-fatal).
    #[error("disk store error: {0}")]
    Disk(#[from] DiskError),
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Disk-store-internal error type. Converted to [`EngineError::DiskIo`] or
/// [`EngineError::ChainCorrupt`]-adjacent handling at the call site; kept
/// distinct so the disk module can describe format violations precisely.
#[derive(Debug, Error)]
pub enum DiskError {
    /// Underlying filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block header's magic number did not match.
    #[error("bad magic in block header (file {file})")]
    BadMagic {
        /// Path of the offending file.
        file: String,
    },

    /// A block's payload failed CRC32 validation.
    #[error("CRC mismatch in file {file} (expected {expected:#010x}, got {actual:#010x})")]
    CrcMismatch {
        /// Path of the offending file.
        file: String,
        /// CRC recorded in the header.
        expected: u32,
        /// CRC computed over the payload actually read.
        actual: u32,
    },

    /// A block's `first_utc_ms` regressed relative to the previous block
    /// in the same file, violating the monotonic-timestamp recovery check.
    #[error("timestamp regression in file {file}: {prev} -> {next}")]
    TimestampRegression {
        /// Path of the offending file.
        file: String,
        /// Previous block's `first_utc_ms`.
        prev: u64,
        /// This block's `first_utc_ms`.
        next: u64,
    },

    /// `record_count` in a block header exceeds the format maximum for
    /// its kind (6 for TSD, 2 for EVT).
    #[error("implausible record_count {count} for kind {kind:?} in file {file}")]
    ImplausibleRecordCount {
        /// Path of the offending file.
        file: String,
        /// The kind the block claims to hold.
        kind: crate::record::SensorKind,
        /// The offending count.
        count: u32,
    },
}
