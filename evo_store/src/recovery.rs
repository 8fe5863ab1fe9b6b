//! Startup recovery (§4.8): validates every on-disk block and
//! quarantines whole files that fail, then stops. No data is brought
//! into RAM — cursors resolve lazily the first time the Read Path
//! touches a sensor's directory (`DiskPos::START`, `seq: None`), which
//! is already "initialize disk_cursor to the first block of the lowest
//! surviving sequence" without any SCB reconstruction required here.

use crate::disk::{BlockHeader, HEADER_LEN};
use crate::engine::Engine;
use crate::error::{DiskError, EngineResult};
use crate::ids::{ConsumerId, SensorId};
use evo_common::consts::SECTOR_SIZE;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Validate one file's full sequence of blocks: magic (via
/// `BlockHeader::parse`), CRC32 over the payload, non-decreasing
/// `first_utc_ms` across blocks, and plausible `record_count` (checked
/// by `parse` itself).
fn validate_file(path: &Path) -> Result<(), DiskError> {
    let label = path.display().to_string();
    let mut file = File::open(path)?;
    let mut prev_utc: Option<u64> = None;

    loop {
        let mut hdr_buf = [0u8; HEADER_LEN];
        match file.read_exact(&mut hdr_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let header = BlockHeader::parse(&hdr_buf, &label)?;

        let mut payload = [0u8; SECTOR_SIZE];
        file.read_exact(&mut payload[..header.payload_bytes as usize])?;
        let actual = crc32fast::hash(&payload[..header.payload_bytes as usize]);
        if actual != header.crc32 {
            return Err(DiskError::CrcMismatch { file: label, expected: header.crc32, actual });
        }

        if let Some(prev) = prev_utc {
            if header.first_utc_ms < prev {
                return Err(DiskError::TimestampRegression { file: label, prev, next: header.first_utc_ms });
            }
        }
        prev_utc = Some(header.first_utc_ms);
    }
    Ok(())
}

fn validate_sensor_dir(engine: &Engine, dir: &Path, consumer: ConsumerId, sensor: SensorId) -> EngineResult<()> {
    for seq in engine.disk.list_sequences(dir)? {
        let path = dir.join(format!("data_{seq:010}.bin"));
        if let Err(e) = validate_file(&path) {
            warn!(consumer, sensor, seq, error = %e, "quarantining corrupt disk file");
            engine.disk.quarantine_file(dir, seq, consumer, sensor)?;
        }
    }
    Ok(())
}

/// Scan `<root>/consumer_<c>/sensor_<n>/` for every `(c, n)` already
/// present on disk and quarantine whatever fails validation.
pub fn recover(engine: &Engine) -> EngineResult<()> {
    let root = engine.disk.root();
    let consumer_dirs = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("disk root does not exist yet, nothing to recover");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in consumer_dirs {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some(consumer_str) = name.strip_prefix("consumer_") else { continue };
        let Ok(consumer) = consumer_str.parse::<ConsumerId>() else { continue };

        let sensor_dirs = match fs::read_dir(entry.path()) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for sensor_entry in sensor_dirs {
            let sensor_entry = sensor_entry?;
            let Some(sname) = sensor_entry.file_name().to_str().map(str::to_string) else { continue };
            let Some(sensor_str) = sname.strip_prefix("sensor_") else { continue };
            let Ok(sensor) = sensor_str.parse::<SensorId>() else { continue };
            validate_sensor_dir(engine, &sensor_entry.path(), consumer, sensor)?;
        }
    }
    info!("startup recovery scan complete");
    Ok(())
}
