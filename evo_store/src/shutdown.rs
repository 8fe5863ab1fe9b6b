//! Shutdown flush (§4.8 steps 1-6). The signal handler only ever sets
//! the `shutting_down` flag (§9); the real flush work below runs on the
//! host loop once it observes that flag, via `Engine::shutdown`.

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::ids::SensorId;
use crate::record::{evt_read_pair, evt_write_pair, tsd_read_first_utc, tsd_read_value, tsd_write_first_utc, tsd_write_value, SectorBytes, SensorKind};
use crate::scb::ScbInner;
use tracing::{info, warn};

/// Repack records `[start_index, end_index)` of a RAM sector's bytes
/// into a fresh block payload, re-anchoring the TSD `first_utc_ms` so
/// the block is self-describing even when flushed from mid-sector
/// (a consumer whose own `pending_start` lands partway through it).
fn repack(kind: SensorKind, src: &SectorBytes, start_index: u32, end_index: u32, sample_period_ms: u64) -> (SectorBytes, u64, u64) {
    let mut out: SectorBytes = [0u8; 32];
    let count = end_index - start_index;
    match kind {
        SensorKind::Tsd => {
            let base_utc = tsd_read_first_utc(src);
            let first_utc = base_utc + (start_index as u64) * sample_period_ms;
            tsd_write_first_utc(&mut out, first_utc);
            for i in 0..count {
                let value = tsd_read_value(src, (start_index + i) as usize);
                tsd_write_value(&mut out, i as usize, value);
            }
            let last_utc = first_utc + (count.saturating_sub(1) as u64) * sample_period_ms;
            (out, first_utc, last_utc)
        }
        SensorKind::Evt => {
            let mut first_utc = 0u64;
            let mut last_utc = 0u64;
            for i in 0..count {
                let rec = evt_read_pair(src, (start_index + i) as usize);
                if i == 0 {
                    first_utc = rec.utc_ms;
                }
                last_utc = rec.utc_ms;
                evt_write_pair(&mut out, i as usize, rec.value, rec.utc_ms);
            }
            (out, first_utc, last_utc)
        }
    }
}

/// Flush everything from `consumer`'s `pending_start` through the
/// current tail into that consumer's own directory — the scope that
/// satisfies "records written but not yet acknowledged" (§8 shutdown
/// durability property).
///
/// This RAM backlog is always older than anything the tiered write path
/// already spilled to the same directory during normal operation (§4.5:
/// RAM holds the data written before a sensor crossed its watermark, the
/// direct-to-disk path only takes newly arriving records after that).
/// It is written with [`crate::disk::DiskStore::prepend_blocks`] rather
/// than a plain append, so it reads back first (§4.8 ordering).
fn flush_ram_for_consumer(
    engine: &Engine,
    sensor_id: SensorId,
    guard: &ScbInner,
    kind: SensorKind,
    sample_period_ms: u64,
    consumer: usize,
) -> EngineResult<()> {
    let start = guard.consumers[consumer].pending_start;
    let mut candidate = if start.ram_sector.is_nil() { guard.head } else { start.ram_sector };
    let mut index = if start.ram_sector.is_nil() { 0 } else { start.ram_index };
    let mut blocks = Vec::new();

    while !candidate.is_nil() {
        let filled = if candidate == guard.tail { guard.tail_filled(kind) } else { kind.records_per_sector() };
        if index < filled {
            let buf = engine.pool.read(candidate);
            let (payload, first_utc, last_utc) = repack(kind, &buf, index, filled, sample_period_ms);
            blocks.push(crate::disk::PendingBlock {
                kind,
                sensor_id: sensor_id as u32,
                record_count: filled - index,
                first_utc_ms: first_utc,
                last_utc_ms: last_utc,
                payload,
            });
        }
        if candidate == guard.tail {
            break;
        }
        candidate = engine.chain.next_of(candidate);
        index = 0;
    }

    let dir = engine.disk.sensor_dir(consumer, sensor_id);
    engine.disk.prepend_blocks(&dir, &blocks, engine.config.file_rotation_bytes, engine.config.disk_byte_cap)?;
    Ok(())
}

/// Run the full shutdown flush across every configured sensor.
pub fn flush_all(engine: &Engine) -> EngineResult<()> {
    for sensor_id in engine.sensor_ids() {
        if let Err(e) = flush_sensor(engine, sensor_id) {
            warn!(sensor = sensor_id, error = %e, "shutdown flush failed for sensor (logged, not fatal)");
        }
    }
    info!("shutdown flush complete");
    Ok(())
}

fn flush_sensor(engine: &Engine, sensor_id: SensorId) -> EngineResult<()> {
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);
    let kind = scb.kind();
    let sample_period_ms = scb.config.sample_period_ms;

    // Step 3: flush each consumer's unacknowledged RAM data, in chain
    // order, into that consumer's own directory.
    for consumer in 0..engine.config.consumer_count {
        flush_ram_for_consumer(engine, sensor_id, &guard, kind, sample_period_ms, consumer)?;
    }

    // Every consumer's copy is now durable; the RAM chain itself can be
    // freed outright (the process is exiting — in-memory cursors are
    // rebuilt from disk at the next `init`, so there is nothing left
    // depending on these sectors).
    let mut sector = guard.head;
    while !sector.is_nil() {
        let next = engine.chain.next_of(sector);
        engine.chain.clear_entry(sector);
        engine.pool.free(sector);
        sector = next;
    }
    guard.head = crate::ids::SectorId::NIL;
    guard.tail = crate::ids::SectorId::NIL;
    guard.write_offset = 0;

    // Step 4: flush any partial disk_buffer, replicated to every
    // consumer exactly like a normal disk-tier flush.
    crate::write::flush_disk_buffer(engine, sensor_id, &mut guard, kind)?;

    // Step 5: fsync every consumer's directory.
    for consumer in 0..engine.config.consumer_count {
        let dir = engine.disk.sensor_dir(consumer, sensor_id);
        engine.disk.fsync_dir(&dir)?;
    }

    // Step 6: configurable retain-vs-erase policy.
    if !engine.config.shutdown_retain_disk_files {
        for consumer in 0..engine.config.consumer_count {
            let dir = engine.disk.sensor_dir(consumer, sensor_id);
            engine.disk.erase_dir(&dir)?;
        }
    }

    Ok(())
}
