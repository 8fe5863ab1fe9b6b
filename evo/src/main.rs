//! # EVO Host Loop
//!
//! The synchronous process that owns the tiered sensor-data storage engine
//! for its lifetime: wires up the sensors this gateway build was configured
//! with, spawns one consumer thread per enabled upload destination, and
//! runs the ~1 Hz tiered-policy tick on the main thread until a shutdown
//! signal arrives.
//!
//! Everything this binary does beyond owning the `Engine` — sampling real
//! sensors, running the upload protocol, parsing NMEA sentences, talking to
//! the CAN bus — is out of scope (§1): those collaborators would call into
//! the engine the same way this host loop's stand-in consumer threads do.

mod config;

use clap::Parser;
use config::HostConfig;
use evo_common::config::ConfigLoader;
use evo_store::{Engine, EngineResult};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Set only by the signal handler below; the real flush work happens on
/// the host loop once it observes this flag (§4.8, §9 design notes — no
/// I/O from the handler itself).
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the smallest possible `SIGTERM`/`SIGINT` handlers: an atomic
/// store, nothing else.
fn install_signal_handlers() {
    let action = SigAction::new(SigHandler::Handler(request_shutdown), SaFlags::empty(), SigSet::empty());
    // SAFETY: `request_shutdown` only performs an atomic store, which is
    // async-signal-safe; no other thread-unsafe state is touched.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action).expect("install SIGTERM handler");
        signal::sigaction(Signal::SIGINT, &action).expect("install SIGINT handler");
    }
}

#[derive(Parser, Debug)]
#[command(name = "evo", about = "Host loop for the tiered sensor-data storage engine")]
struct Cli {
    /// Path to the host TOML configuration (engine settings + sensor table).
    #[arg(long, default_value = "evo.toml")]
    config: PathBuf,
}

/// One upload destination's read loop: repeatedly drains whatever the
/// engine has for it across every configured sensor and immediately acks.
///
/// The real upload protocol is an external collaborator (§1 non-goal for
/// this crate); this stand-in exists so the consumer-per-destination
/// concurrency model (§5) has somewhere real to run, and so every write
/// actually gets drained in the absence of a production uploader.
fn run_consumer(engine: Arc<Engine>, consumer: usize, sensors: Vec<evo_store::SensorId>) {
    while !engine.is_shutting_down() {
        let mut drained_any = false;
        for &sensor_id in &sensors {
            loop {
                match engine.read_next(consumer, sensor_id) {
                    Ok(_record) => drained_any = true,
                    Err(evo_store::EngineError::Empty) => break,
                    Err(e) => {
                        warn!(consumer, sensor = sensor_id, error = %e, "consumer read failed");
                        break;
                    }
                }
            }
            if let Err(e) = engine.ack_all_pending(consumer, sensor_id) {
                warn!(consumer, sensor = sensor_id, error = %e, "ack_all_pending failed");
            }
        }
        if !drained_any {
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

fn run(cli: Cli) -> EngineResult<()> {
    let host_config = HostConfig::load(&cli.config).unwrap_or_else(|e| {
        warn!(path = %cli.config.display(), error = %e, "failed to load host config, using defaults");
        HostConfig::default()
    });

    let engine = Engine::init(host_config.engine.clone())?;
    for sensor in &host_config.sensors {
        engine.configure_sensor(sensor.id, sensor.kind, sensor.sample_period_ms)?;
    }
    let sensor_ids: Vec<evo_store::SensorId> = host_config.sensors.iter().map(|s| s.id).collect();
    info!(sensors = sensor_ids.len(), consumers = host_config.engine.consumer_count, "engine initialized");

    install_signal_handlers();

    let consumers: Vec<_> = (0..host_config.engine.consumer_count)
        .map(|c| {
            let engine = engine.clone();
            let sensor_ids = sensor_ids.clone();
            std::thread::spawn(move || run_consumer(engine, c, sensor_ids))
        })
        .collect();

    let tick_period = Duration::from_secs(1);
    loop {
        std::thread::sleep(tick_period);
        engine.tick(evo_store::clock::now_ms());
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("shutdown signal observed, flushing");
            break;
        }
    }

    if let Err(e) = engine.shutdown() {
        error!(error = %e, "shutdown flush reported an error");
    }
    for handle in consumers {
        let _ = handle.join();
    }
    info!("host loop exited cleanly");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!(error = %e, "host loop failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_round_trips() {
        // Exercises the same atomic the signal handler writes, without
        // actually registering a process-wide handler in a test binary.
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        request_shutdown(15);
        assert!(SHUTDOWN_REQUESTED.load(Ordering::SeqCst));
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}
