//! Tiered Policy Engine (§4.5): recomputes occupancy, logs threshold
//! crossings, defensively re-enforces the disk byte cap. Never migrates
//! RAM to disk — that migration is reserved for the shutdown path only
//! (§9 open question, resolved against migration in normal operation).

use crate::engine::Engine;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Occupancy percentages at which a crossing gets logged, so an
/// operator watching `tracing` output sees the approach to watermark
/// well before writes actually start spilling to disk.
const LOG_THRESHOLDS: [u8; 9] = [10, 20, 30, 40, 50, 60, 70, 80, 90];

/// Run one tick of the tiered policy: recompute pool occupancy, log any
/// threshold crossing, and defensively re-enforce each active sensor's
/// disk byte cap (a no-op unless something outside normal operation,
/// e.g. a manual file drop, pushed a directory over cap).
pub fn tick(engine: &Engine, now_ms: u64) {
    let occupancy = engine.pool.occupancy_percent();
    let last = engine.last_logged_occupancy.swap(occupancy, Ordering::Relaxed);
    if occupancy != last {
        for &threshold in &LOG_THRESHOLDS {
            let crossed_up = last < threshold && occupancy >= threshold;
            let crossed_down = last >= threshold && occupancy < threshold;
            if crossed_up {
                if occupancy >= engine.config.watermark_percent {
                    warn!(occupancy, watermark = engine.config.watermark_percent, "pool occupancy at/above watermark");
                } else {
                    info!(occupancy, threshold, "pool occupancy crossed threshold upward");
                }
            } else if crossed_down {
                info!(occupancy, threshold, "pool occupancy crossed threshold downward");
            }
        }
    }

    for sensor_id in engine.sensor_ids() {
        for consumer in 0..engine.config.consumer_count {
            let dir = engine.disk.sensor_dir(consumer, sensor_id);
            if let Err(e) = engine.disk.enforce_byte_cap(&dir, engine.config.disk_byte_cap) {
                warn!(sensor = sensor_id, consumer, error = %e, "tick: byte cap enforcement failed");
            }
        }
    }
    let _ = now_ms;
}
