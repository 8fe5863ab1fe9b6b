//! Engine configuration, loaded from TOML via
//! [`evo_common::config::ConfigLoader`] (§6 `init`, AMBIENT STACK).

use evo_common::config::{ConfigError, SharedConfig};
use evo_common::consts::{
    DEFAULT_CONSUMER_COUNT, DEFAULT_DISK_BYTE_CAP, DEFAULT_DISK_ROOT, DEFAULT_FILE_ROTATION_BYTES,
    DEFAULT_POOL_SIZE, DEFAULT_WATERMARK_PERCENT,
};
use serde::{Deserialize, Serialize};

/// Everything `Engine::init` needs, loadable as a standalone TOML file by
/// the `evo` host binary.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "evo-store-host"
///
/// pool_size = 2048
/// disk_root = "/var/lib/evo_store"
/// disk_byte_cap = 268435456
/// watermark_percent = 80
/// file_rotation_bytes = 65536
/// consumer_count = 3
/// shutdown_retain_disk_files = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub shared: Option<SharedConfig>,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_disk_root")]
    pub disk_root: String,

    #[serde(default = "default_disk_byte_cap")]
    pub disk_byte_cap: u64,

    #[serde(default = "default_watermark_percent")]
    pub watermark_percent: u8,

    #[serde(default = "default_file_rotation_bytes")]
    pub file_rotation_bytes: u64,

    #[serde(default = "default_consumer_count")]
    pub consumer_count: usize,

    /// `true` preserves disk files across a shutdown/init cycle (the
    /// resume path); `false` erases them (clean-restart testing). Both
    /// are valid per the open question in the design notes.
    #[serde(default = "default_shutdown_retain")]
    pub shutdown_retain_disk_files: bool,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}
fn default_disk_root() -> String {
    DEFAULT_DISK_ROOT.to_string()
}
fn default_disk_byte_cap() -> u64 {
    DEFAULT_DISK_BYTE_CAP
}
fn default_watermark_percent() -> u8 {
    DEFAULT_WATERMARK_PERCENT
}
fn default_file_rotation_bytes() -> u64 {
    DEFAULT_FILE_ROTATION_BYTES
}
fn default_consumer_count() -> usize {
    DEFAULT_CONSUMER_COUNT
}
fn default_shutdown_retain() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shared: None,
            pool_size: default_pool_size(),
            disk_root: default_disk_root(),
            disk_byte_cap: default_disk_byte_cap(),
            watermark_percent: default_watermark_percent(),
            file_rotation_bytes: default_file_rotation_bytes(),
            consumer_count: default_consumer_count(),
            shutdown_retain_disk_files: default_shutdown_retain(),
        }
    }
}

impl EngineConfig {
    /// The literal `init(pool_size, disk_root, disk_byte_cap, watermark_pct)`
    /// signature from §6, for callers that do not need a config file.
    pub fn new(pool_size: usize, disk_root: impl Into<String>, disk_byte_cap: u64, watermark_percent: u8) -> Self {
        EngineConfig { pool_size, disk_root: disk_root.into(), disk_byte_cap, watermark_percent, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ValidationError("pool_size must be > 0".into()));
        }
        if self.watermark_percent == 0 || self.watermark_percent > 100 {
            return Err(ConfigError::ValidationError("watermark_percent must be in 1..=100".into()));
        }
        if self.consumer_count == 0 {
            return Err(ConfigError::ValidationError("consumer_count must be > 0".into()));
        }
        if self.file_rotation_bytes == 0 {
            return Err(ConfigError::ValidationError("file_rotation_bytes must be > 0".into()));
        }
        if let Some(shared) = &self.shared {
            shared.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_common::config::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_watermark() {
        let mut cfg = EngineConfig::default();
        cfg.watermark_percent = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
pool_size = 128
disk_root = "/tmp/evo_store_test"
disk_byte_cap = 1048576
watermark_percent = 70
consumer_count = 2
"#
        )
        .unwrap();
        file.flush().unwrap();

        let cfg = EngineConfig::load(file.path()).unwrap();
        assert_eq!(cfg.pool_size, 128);
        assert_eq!(cfg.consumer_count, 2);
        assert_eq!(cfg.watermark_percent, 70);
    }
}
