//! The `Engine`: owns every shared structure (pool, chain table, disk
//! store, per-sensor control blocks) and exposes the public API of §6.
//! Constructed once at `init`, held for the life of the process, torn
//! down explicitly by `shutdown` — no lazy globals (§9).

use crate::chain::ChainTable;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::disk::DiskStore;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ConsumerId, SensorId};
use crate::pool::SectorPool;
use crate::record::{Record, SensorKind};
use crate::scb::{SensorConfig, SensorControlBlock};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

/// A consumer's registered location-correlation sensors, set via
/// `set_location_sensors` and consulted by `write_event_with_location`
/// (§4.4, §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationSensors {
    pub lat: Option<SensorId>,
    pub lon: Option<SensorId>,
    pub alt: Option<SensorId>,
    pub speed: Option<SensorId>,
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) pool: SectorPool,
    pub(crate) chain: ChainTable,
    pub(crate) disk: DiskStore,
    pub(crate) clock: Arc<dyn Clock>,
    sensors: RwLock<HashMap<SensorId, Arc<SensorControlBlock>>>,
    location_sensors: Mutex<Vec<LocationSensors>>,
    shutting_down: AtomicBool,
    /// Occupancy percentage as of the last `tick`, used only to detect
    /// threshold crossings worth a log line (§4.5). Lives on the engine
    /// instance rather than as a module-level global (§9: no lazy globals).
    pub(crate) last_logged_occupancy: AtomicU8,
}

impl Engine {
    /// §6 `init(pool_size, disk_root, disk_byte_cap, watermark_pct)`:
    /// construct the Engine, run startup recovery, return the handle.
    /// Consumer count and rotation size come from `config` (ambient
    /// fields the literal four-argument signature doesn't carry).
    pub fn init(config: EngineConfig) -> EngineResult<Arc<Engine>> {
        Self::init_with_clock(config, Arc::new(SystemClock))
    }

    /// Test-only entry point taking an explicit clock (the seed
    /// scenarios in §8 assert on exact millisecond timestamps).
    pub fn init_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> EngineResult<Arc<Engine>> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;

        let disk = DiskStore::new(config.disk_root.clone());
        let engine = Engine {
            pool: SectorPool::new(config.pool_size),
            chain: ChainTable::new(config.pool_size),
            disk,
            clock,
            sensors: RwLock::new(HashMap::new()),
            location_sensors: Mutex::new(vec![LocationSensors::default(); config.consumer_count]),
            shutting_down: AtomicBool::new(false),
            last_logged_occupancy: AtomicU8::new(0),
            config,
        };

        crate::recovery::recover(&engine)?;
        info!(pool_size = engine.config.pool_size, consumers = engine.config.consumer_count, "engine initialized");
        Ok(Arc::new(engine))
    }

    /// §6 `configure_sensor(sensor_id, kind, sample_period_ms_or_zero)`.
    /// Idempotent: re-registering an existing sensor with identical
    /// parameters is a no-op; re-registering with different parameters
    /// is rejected, since it would silently change the meaning of
    /// already-written records.
    pub fn configure_sensor(&self, sensor_id: SensorId, kind: SensorKind, sample_period_ms: u64) -> EngineResult<()> {
        if kind == SensorKind::Tsd && sample_period_ms == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "sensor {sensor_id}: TSD requires sample_period_ms > 0"
            )));
        }
        if kind == SensorKind::Evt && sample_period_ms != 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "sensor {sensor_id}: EVT must be configured with sample_period_ms = 0"
            )));
        }

        let mut sensors = self.sensors.write();
        if let Some(existing) = sensors.get(&sensor_id) {
            if existing.config.kind == kind && existing.config.sample_period_ms == sample_period_ms {
                return Ok(());
            }
            return Err(EngineError::InvalidConfiguration(format!(
                "sensor {sensor_id} already configured with different parameters"
            )));
        }
        sensors.insert(
            sensor_id,
            Arc::new(SensorControlBlock::new(SensorConfig { kind, sample_period_ms }, self.config.consumer_count)),
        );
        info!(sensor = sensor_id, ?kind, sample_period_ms, "sensor configured");
        Ok(())
    }

    /// §6 `set_location_sensors(consumer, lat, lon, alt, speed)`.
    pub fn set_location_sensors(
        &self,
        consumer: ConsumerId,
        lat: Option<SensorId>,
        lon: Option<SensorId>,
        alt: Option<SensorId>,
        speed: Option<SensorId>,
    ) -> EngineResult<()> {
        if consumer >= self.config.consumer_count {
            return Err(EngineError::UnknownConsumer { consumer, k: self.config.consumer_count });
        }
        self.location_sensors.lock()[consumer] = LocationSensors { lat, lon, alt, speed };
        Ok(())
    }

    pub(crate) fn location_sensors(&self, consumer: ConsumerId) -> Option<LocationSensors> {
        self.location_sensors.lock().get(consumer).copied()
    }

    pub(crate) fn sensor(&self, sensor_id: SensorId) -> EngineResult<Arc<SensorControlBlock>> {
        self.sensors
            .read()
            .get(&sensor_id)
            .cloned()
            .ok_or(EngineError::UnknownSensor(sensor_id))
    }

    /// Every configured sensor id, for diagnostics and recovery sweeps.
    pub(crate) fn sensor_ids(&self) -> Vec<SensorId> {
        self.sensors.read().keys().copied().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn write_tsd(&self, sensor_id: SensorId, value: i32) -> EngineResult<()> {
        crate::write::write_tsd(self, sensor_id, value)
    }

    pub fn write_evt(&self, sensor_id: SensorId, value: i32, utc_ms: u64) -> EngineResult<()> {
        crate::write::write_evt(self, sensor_id, value, utc_ms)
    }

    pub fn write_event_with_location(&self, consumer: ConsumerId, sensor_id: SensorId, value: i32) -> EngineResult<()> {
        crate::write::write_event_with_location(self, consumer, sensor_id, value)
    }

    pub fn read_next(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<Record> {
        crate::read::read_next(self, consumer, sensor_id)
    }

    pub fn read_bulk(
        &self,
        consumer: ConsumerId,
        sensor_id: SensorId,
        out: &mut Vec<Record>,
        n_requested: usize,
    ) -> EngineResult<usize> {
        crate::read::read_bulk(self, consumer, sensor_id, out, n_requested)
    }

    pub fn peek(&self, consumer: ConsumerId, sensor_id: SensorId, k: usize) -> EngineResult<Record> {
        crate::read::peek(self, consumer, sensor_id, k)
    }

    pub fn ack_all_pending(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<()> {
        crate::read::ack_all_pending(self, consumer, sensor_id)
    }

    pub fn revert_pending(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<()> {
        crate::read::revert_pending(self, consumer, sensor_id)
    }

    pub fn pending_count(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<u32> {
        crate::read::pending_count(self, consumer, sensor_id)
    }

    pub fn available_count(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<u64> {
        crate::read::available_count(self, consumer, sensor_id)
    }

    /// §6 `tick(now_ms)`: runs the Tiered Policy engine. Never migrates
    /// RAM to disk (§9 open question, resolved: forbidden in normal
    /// operation).
    pub fn tick(&self, now_ms: u64) {
        crate::policy::tick(self, now_ms);
    }

    /// §6 `shutdown()`: runs the §4.8 flush sequence and marks the
    /// engine refuse further writes.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.shutting_down.store(true, Ordering::Release);
        crate::shutdown::flush_all(self)
    }

    pub fn occupancy_percent(&self) -> u8 {
        self.pool.occupancy_percent()
    }

    pub fn validate_chain(&self, sensor_id: SensorId) -> EngineResult<()> {
        crate::diagnostics::validate_chain(self, sensor_id)
    }

    pub fn chain_length(&self, sensor_id: SensorId) -> EngineResult<usize> {
        crate::diagnostics::chain_length(self, sensor_id)
    }

    pub fn record_counts(&self, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<crate::diagnostics::RecordCounts> {
        crate::diagnostics::record_counts(self, consumer, sensor_id)
    }

    pub fn lock_hold_age_ms(&self, sensor_id: SensorId, now_ms: u64) -> EngineResult<Option<u64>> {
        let scb = self.sensor(sensor_id)?;
        Ok(scb.lock_hold_age_ms(now_ms))
    }
}
