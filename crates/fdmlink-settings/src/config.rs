//! Configuration for fdmlink
//!
//! Supports JSON and TOML files; the default location is
//! `<config_dir>/fdmlink/config.toml`.
//!
//! Configuration is organized into sections:
//! - Connection (port, baud rate, handshake/ack timeouts, reconnect policy)
//! - Streaming (checksums, progress cadence, pause polling, retries)
//! - Scan (per-port and overall timeouts, baud rates to probe)
//! - Emulator (dialect, latency and error injection)

use fdmlink_core::Dialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Port value meaning "scan and use the first detected printer"
pub const AUTO_PORT: &str = "Auto";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port, or "Auto" to scan
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Budget for the identification handshake
    pub handshake_timeout_ms: u64,
    /// Budget for one command's acknowledgement
    pub ack_timeout_ms: u64,
    /// Monitor poll cadence
    pub monitor_interval_ms: u64,
    /// Reconnect attempts before giving up with status Error
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Connect to the in-process emulator instead of hardware
    pub use_emulator: bool,
}

impl ConnectionSettings {
    pub fn is_auto_port(&self) -> bool {
        self.port.is_empty() || self.port.eq_ignore_ascii_case(AUTO_PORT)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: AUTO_PORT.to_string(),
            baud_rate: 115200,
            handshake_timeout_ms: 2000,
            ack_timeout_ms: 5000,
            monitor_interval_ms: 1000,
            reconnect_attempts: 3,
            reconnect_delay_ms: 2000,
            use_emulator: false,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Frame lines as `N<n> <cmd>*<checksum>`
    pub checksums: bool,
    /// Lines between progress publications
    pub chunk_size: usize,
    /// Extra delay after each line
    pub line_delay_ms: u64,
    /// How often a paused worker re-checks its flags
    pub pause_poll_ms: u64,
    /// Re-sends of a line whose acknowledgement failed
    pub max_line_retries: u32,
    /// Bounded wait for the worker during teardown
    pub worker_join_timeout_ms: u64,
    /// Finished jobs retained for `get_job`
    pub history_size: usize,
}

impl StreamingSettings {
    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            checksums: true,
            chunk_size: 1,
            line_delay_ms: 0,
            pause_poll_ms: 100,
            max_line_retries: 0,
            worker_join_timeout_ms: 2000,
            history_size: 10,
        }
    }
}

/// Device scan settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Read budget per port and baud rate
    pub per_port_timeout_ms: u64,
    /// Wall-clock cap on the whole scan
    pub hard_timeout_ms: u64,
    /// Baud rates tried by the fast pass, in priority order
    pub baud_rates: Vec<u32>,
    /// Baud rates tried by the enhanced pass
    pub enhanced_baud_rates: Vec<u32>,
    /// Probe attempts per baud rate in the enhanced pass
    pub enhanced_retries: u32,
    /// Read budget per attempt in the enhanced pass
    pub enhanced_wait_ms: u64,
    /// Run the enhanced pass when the fast pass finds nothing
    pub enhanced_fallback: bool,
}

impl ScanSettings {
    pub fn per_port_timeout(&self) -> Duration {
        Duration::from_millis(self.per_port_timeout_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn enhanced_wait(&self) -> Duration {
        Duration::from_millis(self.enhanced_wait_ms)
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            per_port_timeout_ms: 1500,
            hard_timeout_ms: 10000,
            baud_rates: vec![115200, 250000],
            enhanced_baud_rates: vec![115200, 250000, 57600, 230400, 500000, 9600],
            enhanced_retries: 2,
            enhanced_wait_ms: 3000,
            enhanced_fallback: true,
        }
    }
}

/// Emulator fidelity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorSettings {
    /// Dialect the emulator identifies as
    pub dialect: Dialect,
    /// Artificial delay before each reply
    pub latency_ms: u64,
    /// Chance in `[0, 1]` that a command is answered with an error
    pub error_probability: f64,
    /// Seed for reproducible error injection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Heating simulation cadence
    pub tick_interval_ms: u64,
    /// Temperature heaters settle to when off
    pub ambient_temperature: f64,
}

impl EmulatorSettings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Marlin,
            latency_ms: 0,
            error_probability: 0.0,
            seed: None,
            tick_interval_ms: 1000,
            ambient_temperature: 22.0,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub streaming: StreamingSettings,
    pub scan: ScanSettings,
    pub emulator: EmulatorSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> ConfigResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config_dir>/fdmlink/config.toml`, falling back to the home directory
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("fdmlink").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no config or home directory".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path` if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let c = &self.connection;
        non_zero("connection.baud_rate", c.baud_rate as u64)?;
        non_zero("connection.handshake_timeout_ms", c.handshake_timeout_ms)?;
        non_zero("connection.ack_timeout_ms", c.ack_timeout_ms)?;
        non_zero("connection.monitor_interval_ms", c.monitor_interval_ms)?;

        let s = &self.streaming;
        non_zero("streaming.chunk_size", s.chunk_size as u64)?;
        non_zero("streaming.pause_poll_ms", s.pause_poll_ms)?;
        non_zero("streaming.worker_join_timeout_ms", s.worker_join_timeout_ms)?;

        let scan = &self.scan;
        non_zero("scan.per_port_timeout_ms", scan.per_port_timeout_ms)?;
        non_zero("scan.hard_timeout_ms", scan.hard_timeout_ms)?;
        non_zero("scan.enhanced_wait_ms", scan.enhanced_wait_ms)?;
        if scan.baud_rates.is_empty() {
            return Err(ConfigError::MissingKey("scan.baud_rates".to_string()));
        }
        if scan.enhanced_baud_rates.is_empty() {
            return Err(ConfigError::MissingKey(
                "scan.enhanced_baud_rates".to_string(),
            ));
        }
        if let Some(zero) = scan
            .baud_rates
            .iter()
            .chain(&scan.enhanced_baud_rates)
            .find(|b| **b == 0)
        {
            return Err(ConfigError::ValueOutOfRange {
                key: "scan.baud_rates".to_string(),
                value: zero.to_string(),
            });
        }

        let e = &self.emulator;
        if !(0.0..=1.0).contains(&e.error_probability) {
            return Err(ConfigError::ValueOutOfRange {
                key: "emulator.error_probability".to_string(),
                value: e.error_probability.to_string(),
            });
        }
        non_zero("emulator.tick_interval_ms", e.tick_interval_ms)?;
        if !e.dialect.is_known() {
            return Err(ConfigError::ValueOutOfRange {
                key: "emulator.dialect".to_string(),
                value: e.dialect.to_string(),
            });
        }

        Ok(())
    }
}

fn non_zero(key: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        Err(ConfigError::ValueOutOfRange {
            key: key.to_string(),
            value: "0".to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.connection.is_auto_port());
        assert_eq!(config.connection.ack_timeout(), Duration::from_secs(5));
        assert!(config.streaming.checksums);
        assert_eq!(config.streaming.max_line_retries, 0);
        assert_eq!(config.scan.baud_rates, vec![115200, 250000]);
        assert_eq!(config.emulator.dialect, Dialect::Marlin);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.connection.ack_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValueOutOfRange { .. })
        ));

        let mut config = Config::default();
        config.scan.baud_rates.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingKey(_))));

        let mut config = Config::default();
        config.emulator.error_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.streaming.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB0"

            [emulator]
            dialect = "Klipper"
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB0");
        assert!(!config.connection.is_auto_port());
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.emulator.dialect, Dialect::Klipper);
        assert_eq!(config.emulator.seed, Some(7));
        assert_eq!(config.streaming.pause_poll_ms, 100);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Config::default()
            .save_to_file(Path::new("config.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::UnsupportedFormat(_))
        ));
    }
}
