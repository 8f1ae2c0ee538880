//! # fdmlink Device Database
//!
//! Printer profiles, the built-in catalog, the firmware dialect classifier
//! and the profile registry used to pick a profile for a detected printer.

pub mod builtin;
pub mod dialect;
pub mod error;
pub mod model;
pub mod registry;

pub use builtin::{builtin_profiles, FALLBACK_PROFILE};
pub use dialect::{classify, Classification};
pub use error::{DeviceError, DeviceResult, ProfileError, ProfileResult};
pub use model::{
    AxisLimits, BuildVolume, Capabilities, ConnectionDefaults, DialectCommands, PrinterProfile,
    TemperatureLimits,
};
pub use registry::{ProfileMatch, ProfileRegistry};
