//! Error types for the device database crate.
//!
//! Structured errors for profile registry management, persistence and
//! validation.

use std::io;
use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The requested profile was not found.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// A profile with this name already exists.
    #[error("Profile already exists: {0}")]
    ProfileAlreadyExists(String),

    /// Built-in profiles cannot be removed or overwritten.
    #[error("Profile is built in: {0}")]
    BuiltinProfile(String),

    /// Failed to load profiles from storage.
    #[error("Failed to load profiles: {0}")]
    LoadError(String),

    /// Failed to save profiles to storage.
    #[error("Failed to save profiles: {0}")]
    SaveError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A profile validation error occurred.
    #[error("Validation error: {0}")]
    Validation(#[from] ProfileError),
}

/// Errors related to printer profile validation.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// A required field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Profiles must name a concrete dialect.
    #[error("Profile {0} has no known dialect")]
    UnknownDialect(String),

    /// A build volume dimension is not positive.
    #[error("Invalid build volume on {axis}: {value}")]
    InvalidBuildVolume { axis: String, value: f64 },

    /// The baud rate is not supported.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// A numeric value is out of valid range.
    #[error("Value out of range for '{field}': {value}")]
    ValueOutOfRange { field: String, value: String },
}

/// Result type alias for registry operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type alias for profile validation.
pub type ProfileResult<T> = Result<T, ProfileError>;
