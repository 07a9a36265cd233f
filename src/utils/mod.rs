// src/utils/mod.rs
//! Shared plumbing: errors and configuration

pub mod config;
pub mod errors;

pub use config::{BagConfig, BrokerConfig, CliOverrides, PlayerConfig, RecorderConfig};
pub use errors::{BagError, FormatError, Result};
