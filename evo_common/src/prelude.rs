//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use evo_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use evo_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    DEFAULT_CONSUMER_COUNT, DEFAULT_DISK_BYTE_CAP, DEFAULT_DISK_ROOT,
    DEFAULT_FILE_ROTATION_BYTES, DEFAULT_POOL_SIZE, DEFAULT_WATERMARK_PERCENT, SECTOR_SIZE,
    TICK_RATE_HZ,
};
