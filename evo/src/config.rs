//! Host-binary configuration: the engine settings plus the fixed set of
//! sensors this gateway build was wired up with. Sensor enumeration is
//! part of build-time configuration, not a runtime discovery protocol
//! (§9 open question), so it lives here rather than in `evo_store`.

use evo_store::{EngineConfig, SensorId, SensorKind};
use serde::{Deserialize, Serialize};

/// One entry in the host config's `[[sensors]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSpec {
    pub id: SensorId,
    pub kind: SensorKind,
    /// Sample period in milliseconds for `Tsd` sensors; must be `0` for
    /// `Evt` sensors (`Engine::configure_sensor` enforces both).
    #[serde(default)]
    pub sample_period_ms: u64,
}

/// Top-level TOML document the `evo` binary loads via `--config`.
///
/// # TOML Example
///
/// ```toml
/// [engine]
/// pool_size = 2048
/// disk_root = "/var/lib/evo_store"
///
/// [[sensors]]
/// id = 7
/// kind = "tsd"
/// sample_period_ms = 1000
///
/// [[sensors]]
/// id = 10
/// kind = "evt"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_common::config::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_engine_and_sensors_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[engine]
pool_size = 64
disk_root = "/tmp/evo_store_host_test"
watermark_percent = 75

[[sensors]]
id = 7
kind = "tsd"
sample_period_ms = 1000

[[sensors]]
id = 10
kind = "evt"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let cfg = HostConfig::load(file.path()).unwrap();
        assert_eq!(cfg.engine.pool_size, 64);
        assert_eq!(cfg.sensors.len(), 2);
        assert_eq!(cfg.sensors[0].id, 7);
        assert_eq!(cfg.sensors[0].kind, SensorKind::Tsd);
        assert_eq!(cfg.sensors[0].sample_period_ms, 1000);
        assert_eq!(cfg.sensors[1].kind, SensorKind::Evt);
        assert_eq!(cfg.sensors[1].sample_period_ms, 0);
    }

    #[test]
    fn missing_sensors_table_defaults_empty() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\npool_size = 32\ndisk_root = \"/tmp/evo_store_host_test2\"\n").unwrap();
        file.flush().unwrap();

        let cfg = HostConfig::load(file.path()).unwrap();
        assert!(cfg.sensors.is_empty());
    }
}
