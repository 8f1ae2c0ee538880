//! # fdmlink
//!
//! Talks to FDM 3D printers over a serial link:
//! - finds printers on USB-serial ports and classifies their firmware dialect
//! - picks a matching printer profile from the built-in catalog
//! - streams sliced G-code with line numbers, checksums and acknowledgement
//!   tracking, with pause/resume and emergency stop
//! - ships an in-process printer emulator for hardware-free runs and tests
//!
//! ## Architecture
//!
//! 1. **fdmlink-core** - errors, data model, streaming state machine, event bus
//! 2. **fdmlink-devicedb** - printer profiles and dialect classification
//! 3. **fdmlink-settings** - validated, file-backed configuration
//! 4. **fdmlink-communication** - links, emulator, scanner and the engine
//! 5. **fdmlink** - logging setup and the command-line tool

pub use fdmlink_communication as communication;
pub use fdmlink_core as core;
pub use fdmlink_devicedb as devicedb;
pub use fdmlink_settings as settings;

pub use fdmlink_communication::{
    DetectedDevice, DeviceEmulator, EngineStatus, OperationResult, PrinterEngine, PrinterService,
    Scanner, EMULATOR_PORT,
};
pub use fdmlink_core::{
    ConnectionStatus, Dialect, EngineEvent, Error, ErrorKind, JobStatus, PrintJob, PrinterInfo,
    ProgressCallback, Result, StreamingStatus, TemperatureSnapshot,
};
pub use fdmlink_devicedb::{PrinterProfile, ProfileRegistry};
pub use fdmlink_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("FDMLINK_BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize logging
///
/// Sets up structured logging with:
/// - output on stderr, leaving stdout to command results
/// - RUST_LOG environment variable support, `info` by default
/// - target, level, thread ids and line numbers on every event
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        LogFormat::Pretty => registry.with(layer).try_init()?,
        LogFormat::Json => registry.with(layer.json()).try_init()?,
    }

    Ok(())
}
