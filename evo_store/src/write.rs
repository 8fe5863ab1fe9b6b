//! Write Path: appends TSD values or EVT pairs to a sensor's tail,
//! transparently routing to the per-sensor disk buffer once the pool
//! crosses the high watermark (§4.3, §4.4, §4.5).

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::ids::SensorId;
use crate::record::{evt_write_pair, tsd_write_first_utc, tsd_write_value, SensorKind};
use crate::scb::{DiskBuffer, ScbInner, SensorControlBlock};
use tracing::{debug, warn};

/// Where a record about to be written will land, decided fresh each time
/// the current tail/buffer is full (§4.5).
enum Destination {
    Ram,
    Disk,
}

/// Ensure the sensor has room for one more record of `kind`, allocating
/// a new RAM sector or flipping to the disk buffer as the tiered policy
/// dictates. Does not write the record itself.
fn ensure_capacity(
    engine: &Engine,
    sensor_id: SensorId,
    scb: &SensorControlBlock,
    inner: &mut ScbInner,
    kind: SensorKind,
    now_ms: u64,
) -> EngineResult<Destination> {
    if inner.disk_buffer.active {
        if !inner.disk_buffer.is_full(kind) {
            return Ok(Destination::Disk);
        }
        flush_disk_buffer(engine, sensor_id, inner, kind)?;
    }

    if !inner.tail.is_nil() && inner.tail_filled(kind) < kind.records_per_sector() {
        return Ok(Destination::Ram);
    }

    let occupancy = engine.pool.occupancy_percent();
    if occupancy < engine.config.watermark_percent {
        if let Some(new_tail) = engine.pool.allocate() {
            engine.chain.init_entry(new_tail, sensor_id, kind, now_ms);
            if !inner.tail.is_nil() {
                engine.chain.set_next(inner.tail, new_tail);
            }
            if inner.head.is_nil() {
                inner.head = new_tail;
            }
            inner.tail = new_tail;
            inner.write_offset = 0;
            if kind == SensorKind::Tsd {
                engine.pool.with_mut(new_tail, |buf| tsd_write_first_utc(buf, now_ms));
                inner.write_offset = 8;
            }
            return Ok(Destination::Ram);
        }
        warn!(sensor = sensor_id, "pool reported capacity but allocate() failed, spilling to disk");
    }

    debug!(sensor = sensor_id, occupancy, watermark = engine.config.watermark_percent, "routing write to disk");
    inner.disk_buffer = DiskBuffer { active: true, ..DiskBuffer::default() };
    let _ = scb; // kept for symmetry / future per-sensor disk policy hooks
    Ok(Destination::Disk)
}

/// Flush a full (or, at shutdown, partial) disk buffer as one block,
/// replicated into every consumer's directory — disk storage is
/// per-consumer so each can ack independently (§3, §4.6).
pub(crate) fn flush_disk_buffer(
    engine: &Engine,
    sensor_id: SensorId,
    inner: &mut ScbInner,
    kind: SensorKind,
) -> EngineResult<()> {
    if !inner.disk_buffer.active || inner.disk_buffer.filled == 0 {
        inner.disk_buffer.reset();
        return Ok(());
    }
    let buf = inner.disk_buffer;
    for consumer in 0..engine.config.consumer_count {
        let dir = engine.disk.sensor_dir(consumer, sensor_id);
        engine
            .disk
            .append_block(
                &dir,
                kind,
                sensor_id as u32,
                buf.filled,
                buf.first_utc_ms,
                buf.last_utc_ms,
                &buf.bytes,
                engine.config.file_rotation_bytes,
                engine.config.disk_byte_cap,
            )
            .map_err(|e| {
                warn!(sensor = sensor_id, consumer, error = %e, "disk buffer flush failed");
                EngineError::OutOfMemory
            })?;
    }
    inner.disk_buffer.reset();
    Ok(())
}

pub fn write_tsd(engine: &Engine, sensor_id: SensorId, value: i32) -> EngineResult<()> {
    if engine.is_shutting_down() {
        return Err(EngineError::ShuttingDown);
    }
    let scb = engine.sensor(sensor_id)?;
    if scb.kind() != SensorKind::Tsd {
        return Err(EngineError::InvalidConfiguration(format!(
            "sensor {sensor_id} is not configured as TSD"
        )));
    }
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }

    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);

    match ensure_capacity(engine, sensor_id, &scb, &mut guard, SensorKind::Tsd, now)? {
        Destination::Ram => {
            let tail = guard.tail;
            let idx = guard.tail_filled(SensorKind::Tsd) as usize;
            engine.pool.with_mut(tail, |b| tsd_write_value(b, idx, value));
            guard.write_offset += 4;
        }
        Destination::Disk => {
            let idx = guard.disk_buffer.filled as usize;
            if idx == 0 {
                guard.disk_buffer.first_utc_ms = now;
            }
            crate::record::tsd_write_value(&mut guard.disk_buffer.bytes, idx, value);
            if idx == 0 {
                tsd_write_first_utc(&mut guard.disk_buffer.bytes, guard.disk_buffer.first_utc_ms);
            }
            guard.disk_buffer.last_utc_ms =
                guard.disk_buffer.first_utc_ms + (idx as u64) * scb.config.sample_period_ms;
            guard.disk_buffer.filled += 1;
            if guard.disk_buffer.is_full(SensorKind::Tsd) {
                flush_disk_buffer(engine, sensor_id, &mut guard, SensorKind::Tsd)?;
            }
        }
    }
    guard.last_value = Some(value);
    Ok(())
}

pub fn write_evt(engine: &Engine, sensor_id: SensorId, value: i32, utc_ms: u64) -> EngineResult<()> {
    if engine.is_shutting_down() {
        return Err(EngineError::ShuttingDown);
    }
    let scb = engine.sensor(sensor_id)?;
    if scb.kind() != SensorKind::Evt {
        return Err(EngineError::InvalidConfiguration(format!(
            "sensor {sensor_id} is not configured as EVT"
        )));
    }
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }

    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);

    match ensure_capacity(engine, sensor_id, &scb, &mut guard, SensorKind::Evt, now)? {
        Destination::Ram => {
            let tail = guard.tail;
            let idx = guard.tail_filled(SensorKind::Evt) as usize;
            engine.pool.with_mut(tail, |b| evt_write_pair(b, idx, value, utc_ms));
            guard.write_offset += 12;
        }
        Destination::Disk => {
            let idx = guard.disk_buffer.filled as usize;
            evt_write_pair(&mut guard.disk_buffer.bytes, idx, value, utc_ms);
            if idx == 0 {
                guard.disk_buffer.first_utc_ms = utc_ms;
            }
            guard.disk_buffer.last_utc_ms = utc_ms;
            guard.disk_buffer.filled += 1;
            if guard.disk_buffer.is_full(SensorKind::Evt) {
                flush_disk_buffer(engine, sensor_id, &mut guard, SensorKind::Evt)?;
            }
        }
    }
    guard.last_value = Some(value);
    Ok(())
}

/// Samples `utc_ms` once, writes the primary EVT record, then re-stamps
/// each registered location sensor's most recently written value under
/// the same timestamp so all records are joinable on `utc_ms` (§4.4).
pub fn write_event_with_location(
    engine: &Engine,
    consumer: crate::ids::ConsumerId,
    sensor_id: SensorId,
    value: i32,
) -> EngineResult<()> {
    let utc_ms = engine.clock.now_ms();
    write_evt(engine, sensor_id, value, utc_ms)?;

    let Some(locations) = engine.location_sensors(consumer) else {
        return Ok(());
    };
    for loc_sensor in [locations.lat, locations.lon, locations.alt, locations.speed].into_iter().flatten() {
        let reading = engine.sensor(loc_sensor).ok().and_then(|scb| {
            let guard = scb.lock(utc_ms);
            guard.last_value
        });
        if let Some(reading) = reading {
            write_evt(engine, loc_sensor, reading, utc_ms)?;
        }
    }
    Ok(())
}
