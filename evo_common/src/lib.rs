//! EVO Common Library
//!
//! This crate provides shared constants and configuration loading utilities
//! for the EVO storage workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide numeric defaults
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use evo_common::config::{ConfigLoader, SharedConfig};
//! use evo_common::consts::DEFAULT_POOL_SIZE;
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
