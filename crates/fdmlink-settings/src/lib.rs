//! fdmlink Settings Crate
//!
//! Typed, validated, file-backed configuration for the engine, scanner and
//! emulator.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, EmulatorSettings, ScanSettings, StreamingSettings, AUTO_PORT,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
