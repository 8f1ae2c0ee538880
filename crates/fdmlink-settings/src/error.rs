//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Failures reading or writing a config file
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file exists but could not be read
    #[error("Cannot read config {0}")]
    LoadError(String),

    /// The file could not be written
    #[error("Cannot write config: {0}")]
    SaveError(String),

    /// No platform config or home directory
    #[error("No config location: {0}")]
    ConfigDirectory(String),

    #[error("Config file I/O: {0}")]
    IoError(#[from] io::Error),

    #[error("Malformed JSON config: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The file parsed but holds unusable values
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
}

/// A config that parsed but cannot drive the engine
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An empty list or string where one entry is required
    #[error("{0} must not be empty")]
    MissingKey(String),

    /// Extension other than `.json` or `.toml`
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("{key} = {value} is out of range")]
    ValueOutOfRange { key: String, value: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_key() {
        let err = ConfigError::MissingKey("scan.baud_rates".to_string());
        assert_eq!(err.to_string(), "scan.baud_rates must not be empty");

        let err = ConfigError::ValueOutOfRange {
            key: "emulator.error_probability".to_string(),
            value: "1.5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "emulator.error_probability = 1.5 is out of range"
        );

        let err: SettingsError = err.into();
        assert!(err.to_string().starts_with("Invalid config:"));
    }

    #[test]
    fn test_parse_failures_convert() {
        let toml_err = toml::from_str::<toml::Value>("[connection\nport = 1").unwrap_err();
        let err: SettingsError = toml_err.into();
        assert!(matches!(err, SettingsError::TomlError(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::JsonError(_)));
    }
}
