//! Diagnostics surface (§4.10): O(1) pool occupancy, per-sensor record
//! counts, chain length, the `validate_chain` integrity sweep, and the
//! lock-hold-age telemetry `scb::SensorControlBlock` already tracks.
//! Exposed to operator tooling via `evo_diagnostic`.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ConsumerId, SensorId};
use tracing::warn;

/// Record counts for a (consumer, sensor) pair: RAM is shared across
/// consumers (one chain per sensor); disk is per-consumer (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCounts {
    pub ram_records: u64,
    pub disk_records: u64,
}

/// Walk the sensor's chain and sum records currently filled across all
/// sectors, independent of any single consumer's read position.
pub fn total_ram_records(engine: &Engine, sensor_id: SensorId) -> EngineResult<u64> {
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);
    let kind = scb.kind();

    let chain = engine
        .chain
        .traverse(guard.head, sensor_id, engine.pool.pool_size())
        .map_err(|fault| {
            scb.mark_inactive();
            EngineError::ChainCorrupt { sensor: sensor_id, reason: format!("{fault:?}") }
        })?;

    let mut total = 0u64;
    for sector in chain {
        total += if sector == guard.tail { guard.tail_filled(kind) as u64 } else { kind.records_per_sector() as u64 };
    }
    Ok(total)
}

/// Total records currently on disk for `consumer`'s copy of `sensor`'s
/// stream, scanning every block header under its directory.
pub fn total_disk_records(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<u64> {
    let dir = engine.disk.sensor_dir(consumer, sensor_id);
    let mut total = 0u64;
    for seq in engine.disk.list_sequences(&dir)? {
        let mut pos = crate::disk::DiskPos { seq: Some(seq), block_offset: 0, record_index: 0 };
        loop {
            match engine.disk.current_block(&dir, pos)? {
                Some((header, _payload, normalized)) if normalized.seq == Some(seq) => {
                    total += header.record_count as u64;
                    pos = crate::disk::DiskPos {
                        seq: Some(seq),
                        block_offset: normalized.block_offset
                            + crate::disk::HEADER_LEN as u64
                            + header.payload_bytes as u64,
                        record_index: 0,
                    };
                }
                _ => break,
            }
        }
    }
    Ok(total)
}

pub fn record_counts(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<RecordCounts> {
    if consumer >= engine.config.consumer_count {
        return Err(EngineError::UnknownConsumer { consumer, k: engine.config.consumer_count });
    }
    Ok(RecordCounts {
        ram_records: total_ram_records(engine, sensor_id)?,
        disk_records: total_disk_records(engine, consumer, sensor_id)?,
    })
}

/// Chain length, O(chain) — the number of sectors currently allocated
/// to this sensor.
pub fn chain_length(engine: &Engine, sensor_id: SensorId) -> EngineResult<usize> {
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);
    engine
        .chain
        .traverse(guard.head, sensor_id, engine.pool.pool_size())
        .map(|chain| chain.len())
        .map_err(|fault| {
            scb.mark_inactive();
            EngineError::ChainCorrupt { sensor: sensor_id, reason: format!("{fault:?}") }
        })
}

/// Integrity sweep: `traverse` plus the owner/flag checks §4.10
/// requires. Marks the sensor inactive and returns `ChainCorrupt` on
/// the first violation found.
pub fn validate_chain(engine: &Engine, sensor_id: SensorId) -> EngineResult<()> {
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);

    let chain = engine
        .chain
        .traverse(guard.head, sensor_id, engine.pool.pool_size())
        .map_err(|fault| {
            scb.mark_inactive();
            warn!(sensor = sensor_id, ?fault, "validate_chain found corruption");
            EngineError::ChainCorrupt { sensor: sensor_id, reason: format!("{fault:?}") }
        })?;

    for sector in &chain {
        if !engine.chain.flag_get(*sector, crate::chain::ChainFlags::IN_USE) {
            scb.mark_inactive();
            return Err(EngineError::ChainCorrupt {
                sensor: sensor_id,
                reason: format!("sector {sector} reachable but not marked in_use"),
            });
        }
    }
    Ok(())
}
