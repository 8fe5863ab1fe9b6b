//! Tiered sensor-data storage engine.
//!
//! Buffers time-series and event records between producer sensor paths and
//! one or more upload-destination consumers, spilling to disk once the RAM
//! sector pool crosses its high watermark. See each module for the piece of
//! the design it owns; [`Engine`] is the crate's single public entry point.

pub mod chain;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod disk;
pub mod engine;
pub mod error;
pub mod ids;
pub mod policy;
pub mod pool;
pub mod read;
pub mod record;
pub mod recovery;
pub mod scb;
pub mod shutdown;
pub mod write;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::EngineConfig;
pub use engine::{Engine, LocationSensors};
pub use error::{DiskError, EngineError, EngineResult};
pub use ids::{ConsumerId, SectorId, SensorId};
pub use record::{Record, SensorKind};
