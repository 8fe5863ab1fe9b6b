//! Read Path: per-consumer record retrieval, crossing the RAM→disk
//! boundary transparently, plus the pending/ack/revert bookkeeping that
//! gives every consumer an independent view of a sensor's stream (§4.9).

use crate::disk::{DiskPos, HEADER_LEN};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ConsumerId, SensorId};
use crate::record::{evt_read_pair, tsd_read_record, Record, SensorKind};
use crate::scb::{CursorState, ScbInner, SensorControlBlock};
use tracing::{info, warn};

enum RamScan {
    Found { sector: crate::ids::SectorId, index: u32 },
    NoRam { parked: CursorState },
}

/// Walk forward from `cursor`'s RAM position looking for the next
/// unread record, lazily crossing sector boundaries as tail-fill state
/// allows. Never reads past the current tail's fill level.
fn ram_scan(guard: &ScbInner, chain: &crate::chain::ChainTable, kind: SensorKind, cursor: CursorState) -> RamScan {
    let mut candidate = if cursor.ram_sector.is_nil() { guard.head } else { cursor.ram_sector };
    let mut index = if cursor.ram_sector.is_nil() { 0 } else { cursor.ram_index };

    loop {
        if candidate.is_nil() {
            return RamScan::NoRam {
                parked: CursorState { ram_sector: candidate, ram_index: index, disk: cursor.disk },
            };
        }
        let filled = if candidate == guard.tail { guard.tail_filled(kind) } else { kind.records_per_sector() };
        if index < filled {
            return RamScan::Found { sector: candidate, index };
        }
        if candidate == guard.tail {
            return RamScan::NoRam {
                parked: CursorState { ram_sector: candidate, ram_index: index, disk: cursor.disk },
            };
        }
        candidate = chain.next_of(candidate);
        index = 0;
    }
}

fn decode_ram(
    engine: &Engine,
    sector: crate::ids::SectorId,
    index: u32,
    kind: SensorKind,
    sample_period_ms: u64,
) -> Record {
    let buf = engine.pool.read(sector);
    match kind {
        SensorKind::Tsd => tsd_read_record(&buf, index as usize, sample_period_ms),
        SensorKind::Evt => evt_read_pair(&buf, index as usize),
    }
}

fn decode_disk(payload: &crate::record::SectorBytes, index: u32, kind: SensorKind, sample_period_ms: u64) -> Record {
    match kind {
        SensorKind::Tsd => tsd_read_record(payload, index as usize, sample_period_ms),
        SensorKind::Evt => evt_read_pair(payload, index as usize),
    }
}

/// Produce the next record for `cursor`, without side effects beyond
/// the disk I/O inherent to resolving a `DiskPos`. Returns the record
/// and the cursor's new position, or `None` if nothing is available.
/// Crosses into the disk tier, reading from `consumer`'s own directory,
/// once the RAM scan reaches the tail with nothing left to give.
fn advance_from_for(
    engine: &Engine,
    consumer: ConsumerId,
    sensor_id: SensorId,
    scb: &SensorControlBlock,
    guard: &ScbInner,
    kind: SensorKind,
    cursor: CursorState,
) -> EngineResult<Option<(Record, CursorState)>> {
    match ram_scan(guard, &engine.chain, kind, cursor) {
        RamScan::Found { sector, index } => {
            let record = decode_ram(engine, sector, index, kind, scb.config.sample_period_ms);
            let next = CursorState { ram_sector: sector, ram_index: index + 1, disk: cursor.disk };
            Ok(Some((record, next)))
        }
        RamScan::NoRam { parked } => {
            let dir = engine.disk.sensor_dir(consumer, sensor_id);
            match engine.disk.current_block(&dir, parked.disk)? {
                Some((header, payload, normalized)) => {
                    let record = decode_disk(&payload, normalized.record_index, kind, scb.config.sample_period_ms);
                    let next_disk = crate::disk::DiskStore::advance(normalized, &header);
                    let next = CursorState { ram_sector: parked.ram_sector, ram_index: parked.ram_index, disk: next_disk };
                    Ok(Some((record, next)))
                }
                None => Ok(None),
            }
        }
    }
}

fn check_consumer(engine: &Engine, consumer: ConsumerId) -> EngineResult<()> {
    if consumer >= engine.config.consumer_count {
        return Err(EngineError::UnknownConsumer { consumer, k: engine.config.consumer_count });
    }
    Ok(())
}

pub fn read_next(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<Record> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }
    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);
    let kind = scb.kind();
    let cursor = guard.consumers[consumer].read_cursor;

    let Some((record, next)) = advance_from_for(engine, consumer, sensor_id, &scb, &guard, kind, cursor)? else {
        return Err(EngineError::Empty);
    };

    let state = &mut guard.consumers[consumer];
    if state.pending_count == 0 {
        state.pending_start = cursor;
    }
    state.pending_count += 1;
    state.read_cursor = next;
    Ok(record)
}

/// Fill up to `n_requested` records under a single lock acquisition.
/// Equivalent to calling `read_next` repeatedly, stopping at the first
/// `Empty` — but without a pending-state reshuffle after every record.
pub fn read_bulk(
    engine: &Engine,
    consumer: ConsumerId,
    sensor_id: SensorId,
    out: &mut Vec<Record>,
    n_requested: usize,
) -> EngineResult<usize> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }
    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);
    let kind = scb.kind();

    let start_cursor = guard.consumers[consumer].read_cursor;
    let mut cursor = start_cursor;
    let mut produced = 0usize;
    while produced < n_requested {
        match advance_from_for(engine, consumer, sensor_id, &scb, &guard, kind, cursor)? {
            Some((record, next)) => {
                out.push(record);
                cursor = next;
                produced += 1;
            }
            None => break,
        }
    }

    let state = &mut guard.consumers[consumer];
    if produced > 0 {
        if state.pending_count == 0 {
            state.pending_start = start_cursor;
        }
        state.pending_count += produced as u32;
        state.read_cursor = cursor;
    }
    Ok(produced)
}

/// Return the `k`-th record (0-based) the consumer would see next,
/// without touching the cursor or pending state.
pub fn peek(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId, k: usize) -> EngineResult<Record> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);
    let kind = scb.kind();

    let mut cursor = guard.consumers[consumer].read_cursor;
    let mut last = None;
    for _ in 0..=k {
        match advance_from_for(engine, consumer, sensor_id, &scb, &guard, kind, cursor)? {
            Some((record, next)) => {
                cursor = next;
                last = Some(record);
            }
            None => return Err(EngineError::Empty),
        }
    }
    Ok(last.expect("loop runs at least once"))
}

/// Records still reachable by this consumer, in RAM and on disk.
pub fn available_count(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<u64> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);
    let kind = scb.kind();

    let mut count = 0u64;
    let mut candidate = if guard.consumers[consumer].read_cursor.ram_sector.is_nil() {
        guard.head
    } else {
        guard.consumers[consumer].read_cursor.ram_sector
    };
    let mut index = if guard.consumers[consumer].read_cursor.ram_sector.is_nil() {
        0
    } else {
        guard.consumers[consumer].read_cursor.ram_index
    };
    while !candidate.is_nil() {
        let filled = if candidate == guard.tail { guard.tail_filled(kind) } else { kind.records_per_sector() };
        count += filled.saturating_sub(index) as u64;
        if candidate == guard.tail {
            break;
        }
        candidate = engine.chain.next_of(candidate);
        index = 0;
    }

    let dir = engine.disk.sensor_dir(consumer, sensor_id);
    let mut pos = guard.consumers[consumer].read_cursor.disk;
    loop {
        match engine.disk.current_block(&dir, pos)? {
            Some((header, _payload, normalized)) => {
                count += (header.record_count - normalized.record_index) as u64;
                pos = DiskPos {
                    seq: normalized.seq,
                    block_offset: normalized.block_offset + HEADER_LEN as u64 + header.payload_bytes as u64,
                    record_index: 0,
                };
            }
            None => break,
        }
    }
    Ok(count)
}

pub fn pending_count(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<u32> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let guard = scb.lock(now);
    Ok(guard.consumers[consumer].pending_count)
}

pub fn revert_pending(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<()> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);
    let state = &mut guard.consumers[consumer];
    state.read_cursor = state.pending_start;
    state.pending_count = 0;
    Ok(())
}

/// Index into `chain` of the earliest sector a consumer parked at
/// `boundary` still might need. A cursor parked at the end of a sector
/// (its `ram_index` equal to that sector's fill count) has fully
/// consumed that sector too, even though `ram_scan` never advances a
/// cursor's sector id past a chain's tail — so it counts one sector
/// further than a literal position lookup would, which is what lets a
/// fully-drained final sector be reclaimed.
fn consumed_prefix_len(
    chain: &[crate::ids::SectorId],
    guard: &ScbInner,
    kind: SensorKind,
    boundary: CursorState,
) -> usize {
    if boundary.ram_sector.is_nil() {
        return 0;
    }
    let Some(pos) = chain.iter().position(|&s| s == boundary.ram_sector) else {
        return 0;
    };
    let filled = if chain[pos] == guard.tail { guard.tail_filled(kind) } else { kind.records_per_sector() };
    if boundary.ram_index >= filled {
        pos + 1
    } else {
        pos
    }
}

/// Free every sector every consumer has fully passed, relinking the
/// chain head before each free — never the other way around — then
/// delete whole disk files this consumer's new boundary has moved past
/// (§4.9, §5 "defensive order").
pub fn ack_all_pending(engine: &Engine, consumer: ConsumerId, sensor_id: SensorId) -> EngineResult<()> {
    check_consumer(engine, consumer)?;
    let scb = engine.sensor(sensor_id)?;
    if !scb.is_active() {
        return Err(EngineError::ChainCorrupt { sensor: sensor_id, reason: "sensor quarantined".into() });
    }
    let now = engine.clock.now_ms();
    let mut guard = scb.lock(now);
    let kind = scb.kind();

    let chain = engine
        .chain
        .traverse(guard.head, sensor_id, engine.pool.pool_size())
        .map_err(|fault| {
            scb.mark_inactive();
            warn!(sensor = sensor_id, ?fault, "chain corrupt during ack_all_pending");
            EngineError::ChainCorrupt { sensor: sensor_id, reason: format!("{fault:?}") }
        })?;

    // Acknowledge this consumer's own batch *before* computing the
    // shared free boundary below, so the records it just acked count
    // toward that boundary instead of the stale start of the batch.
    guard.consumers[consumer].pending_start = guard.consumers[consumer].read_cursor;
    guard.consumers[consumer].pending_count = 0;

    if !chain.is_empty() {
        let pending_starts: Vec<CursorState> = guard.consumers.iter().map(|c| c.pending_start).collect();
        let mut safe_count = chain.len();
        for boundary in pending_starts {
            safe_count = safe_count.min(consumed_prefix_len(&chain, &guard, kind, boundary));
        }

        if safe_count > 0 {
            let new_head = chain.get(safe_count).copied().unwrap_or(crate::ids::SectorId::NIL);
            guard.head = new_head;
            if new_head.is_nil() {
                guard.tail = crate::ids::SectorId::NIL;
                guard.write_offset = 0;
            }
            for &sector in &chain[..safe_count] {
                engine.chain.clear_entry(sector);
                engine.pool.free(sector);
            }
            info!(sensor = sensor_id, freed = safe_count, "ack_all_pending freed RAM sectors");
        }
    }

    let disk_seq = guard.consumers[consumer].pending_start.disk.seq;
    if let Some(seq) = disk_seq {
        if seq > 0 {
            let dir = engine.disk.sensor_dir(consumer, sensor_id);
            engine.disk.delete_files_through(&dir, seq - 1)?;
        }
    }
    Ok(())
}
