//! End-to-end scenarios from the storage engine's test-suite seed list.
//! Each test below corresponds to one literal scenario: ordering across
//! the RAM/disk spill boundary, independent multi-consumer acks, the
//! pending/revert round trip, GPS-correlated events, shutdown durability,
//! and the cross-sensor corruption regression under concurrent load.

use evo_store::clock::{Clock, TestClock};
use evo_store::config::EngineConfig;
use evo_store::engine::Engine;
use evo_store::record::SensorKind;
use std::sync::Arc;
use tempfile::tempdir;

fn test_config(disk_root: &std::path::Path, pool_size: usize, watermark_percent: u8) -> EngineConfig {
    EngineConfig {
        pool_size,
        disk_root: disk_root.to_string_lossy().to_string(),
        watermark_percent,
        ..EngineConfig::default()
    }
}

/// S1 — TSD ordering through the spill boundary: values and derived
/// timestamps come back in order no matter which sectors went to disk.
#[test]
fn s1_tsd_ordering_through_spill_boundary() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(1_000_000));
    let engine = Engine::init_with_clock(test_config(dir.path(), 4, 50), clock.clone()).unwrap();
    engine.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();

    for v in 0..48i32 {
        engine.write_tsd(7, v).unwrap();
        clock.advance(1000);
    }

    let mut out = Vec::new();
    let n = engine.read_bulk(0, 7, &mut out, 48).unwrap();
    assert_eq!(n, 48);
    for (i, record) in out.iter().enumerate() {
        assert_eq!(record.value, i as i32, "value out of order at index {i}");
        assert_eq!(record.utc_ms, 1_000_000 + (i as u64) * 1000, "timestamp mismatch at index {i}");
    }
}

/// S2 — Two consumers observe the same sensor independently: acking one
/// consumer's reads never affects the other's `available_count` or the
/// values it subsequently reads.
#[test]
fn s2_two_consumers_independent_acks() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(1_000_000));
    let engine = Engine::init_with_clock(test_config(dir.path(), 4, 50), clock.clone()).unwrap();
    engine.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();

    for v in 0..12i32 {
        engine.write_tsd(7, v).unwrap();
        clock.advance(1000);
    }

    for _ in 0..6 {
        engine.read_next(0, 7).unwrap();
    }
    engine.ack_all_pending(0, 7).unwrap();

    assert_eq!(engine.available_count(1, 7).unwrap(), 12);
    let mut out = Vec::new();
    let n = engine.read_bulk(1, 7, &mut out, 12).unwrap();
    assert_eq!(n, 12);
    let values: Vec<i32> = out.iter().map(|r| r.value).collect();
    assert_eq!(values, (0..12).collect::<Vec<_>>());
}

/// S3 — Reading N records then reverting leaves the next N reads
/// identical to the first attempt.
#[test]
fn s3_revert_round_trip() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(1_000_000));
    let engine = Engine::init_with_clock(test_config(dir.path(), 4, 50), clock.clone()).unwrap();
    engine.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();

    for v in 0..48i32 {
        engine.write_tsd(7, v).unwrap();
        clock.advance(1000);
    }

    let mut first = Vec::new();
    engine.read_bulk(0, 7, &mut first, 5).unwrap();
    let first_values: Vec<i32> = first.iter().map(|r| r.value).collect();
    assert_eq!(first_values, vec![0, 1, 2, 3, 4]);

    engine.revert_pending(0, 7).unwrap();

    let mut second = Vec::new();
    engine.read_bulk(0, 7, &mut second, 5).unwrap();
    let second_values: Vec<i32> = second.iter().map(|r| r.value).collect();
    assert_eq!(second_values, vec![0, 1, 2, 3, 4]);
}

/// S4 — A GPS-correlated event write stamps every registered location
/// sensor's record with the exact same `utc_ms` as the primary event.
#[test]
fn s4_evt_with_location_correlation() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(42_000_000));
    let engine = Engine::init_with_clock(test_config(dir.path(), 64, 80), clock.clone()).unwrap();

    for sensor in [10u16, 11, 12, 13, 14] {
        engine.configure_sensor(sensor, SensorKind::Evt, 0).unwrap();
    }
    // Seed last-known-reading state for each location sensor.
    engine.write_evt(11, 421, clock.now_ms()).unwrap(); // lat * 10
    engine.write_evt(12, -710, clock.now_ms()).unwrap(); // lon * 10
    engine.write_evt(13, 120, clock.now_ms()).unwrap(); // alt meters
    engine.write_evt(14, 152, clock.now_ms()).unwrap(); // speed * 10 km/h

    engine.set_location_sensors(0, Some(11), Some(12), Some(13), Some(14)).unwrap();
    clock.advance(5000);
    engine.write_event_with_location(0, 10, 99).unwrap();

    let mut stamps = Vec::new();
    for sensor in [10u16, 11, 12, 13, 14] {
        // Skip the seed record for each location sensor, landing on the
        // one `write_event_with_location` produced.
        let record = if sensor == 10 {
            engine.read_next(0, sensor).unwrap()
        } else {
            engine.read_next(0, sensor).unwrap();
            engine.read_next(0, sensor).unwrap()
        };
        stamps.push(record.utc_ms);
    }
    assert!(stamps.windows(2).all(|w| w[0] == w[1]), "all five records must share one utc_ms: {stamps:?}");
    assert_eq!(stamps[0], clock.now_ms(), "correlated records must carry the write-time timestamp, not the seed one");
}

/// S5 — Shutdown durability: everything written (and not yet acked)
/// reappears after the engine is destroyed and re-initialized against
/// the same disk root.
#[test]
fn s5_shutdown_then_recovery() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(5_000_000));
    {
        let engine = Engine::init_with_clock(test_config(dir.path(), 4, 50), clock.clone()).unwrap();
        engine.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();
        for v in 0..20i32 {
            engine.write_tsd(7, v).unwrap();
            clock.advance(1000);
        }
        engine.shutdown().unwrap();
    }

    let engine2 = Engine::init_with_clock(test_config(dir.path(), 4, 50), clock).unwrap();
    engine2.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();
    assert_eq!(engine2.available_count(0, 7).unwrap(), 20);

    let mut out = Vec::new();
    let n = engine2.read_bulk(0, 7, &mut out, 20).unwrap();
    assert_eq!(n, 20);
    let values: Vec<i32> = out.iter().map(|r| r.value).collect();
    assert_eq!(values, (0..20).collect::<Vec<_>>());
}

/// S6 — Cross-sensor corruption regression: concurrent writers on two
/// distinct sensors, with a third thread acking aggressively, must never
/// corrupt either sensor's chain.
#[test]
fn s6_cross_sensor_corruption_regression() {
    let dir = tempdir().unwrap();
    let engine = Engine::init_with_clock(test_config(dir.path(), 64, 70), Arc::new(TestClock::new(1))).unwrap();
    engine.configure_sensor(7, SensorKind::Tsd, 1000).unwrap();
    engine.configure_sensor(8, SensorKind::Tsd, 1000).unwrap();

    let writer = |engine: Arc<Engine>, sensor: u16| {
        std::thread::spawn(move || {
            for v in 0..4000i32 {
                // OutOfMemory can legitimately happen once both tiers
                // saturate under this adversarial load; only panic on an
                // actual invariant violation.
                let _ = engine.write_tsd(sensor, v);
            }
        })
    };
    let acker = |engine: Arc<Engine>| {
        std::thread::spawn(move || {
            for _ in 0..200 {
                let _ = engine.ack_all_pending(0, 7);
                let _ = engine.ack_all_pending(0, 8);
                std::thread::sleep(std::time::Duration::from_micros(200));
            }
        })
    };

    let h1 = writer(engine.clone(), 7);
    let h2 = writer(engine.clone(), 8);
    let h3 = acker(engine.clone());
    h1.join().unwrap();
    h2.join().unwrap();
    h3.join().unwrap();

    engine.validate_chain(7).expect("sensor 7 chain must remain valid");
    engine.validate_chain(8).expect("sensor 8 chain must remain valid");
}

/// Boundary: freeing the last sector of a sensor's chain must reset both
/// endpoints to `NIL`, not leave a dangling `head`/`tail`. Configured
/// with a single consumer, since a sector only frees once every
/// consumer has passed it and this test only exercises one.
#[test]
fn freeing_last_sector_resets_chain_endpoints() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(TestClock::new(1_000_000));
    let engine = Engine::init_with_clock(
        EngineConfig { consumer_count: 1, ..test_config(dir.path(), 4, 90) },
        clock.clone(),
    )
    .unwrap();
    engine.configure_sensor(3, SensorKind::Evt, 0).unwrap();

    engine.write_evt(3, 1, 1_000).unwrap();
    engine.write_evt(3, 2, 1_001).unwrap();

    engine.read_next(0, 3).unwrap();
    engine.read_next(0, 3).unwrap();
    engine.ack_all_pending(0, 3).unwrap();

    assert_eq!(engine.chain_length(3).unwrap(), 0);
}

/// Boundary: `configure_sensor` rejects a TSD sensor with a zero sample
/// period at registration time, not at first write.
#[test]
fn zero_sample_period_tsd_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = Engine::init(test_config(dir.path(), 4, 80)).unwrap();
    let err = engine.configure_sensor(1, SensorKind::Tsd, 0).unwrap_err();
    assert!(matches!(err, evo_store::error::EngineError::InvalidConfiguration(_)));
}
