use fdmlink_core::Dialect;
use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileResult};

/// Baud rates a profile may declare
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    9600, 19200, 38400, 57600, 115200, 230400, 250000, 500000,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BuildVolume {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for BuildVolume {
    fn default() -> Self {
        Self {
            x: 200.0,
            y: 200.0,
            z: 200.0,
        }
    }
}

impl std::fmt::Display for BuildVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{} mm", self.x, self.y, self.z)
    }
}

/// Per-axis limit (mm/s for feedrate, mm/s² for acceleration)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AxisLimits {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

impl AxisLimits {
    pub const fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }
}

impl Default for AxisLimits {
    fn default() -> Self {
        Self::new(300.0, 300.0, 5.0, 25.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TemperatureLimits {
    pub hotend_max: f64,
    pub bed_max: f64,
    pub chamber_max: Option<f64>,
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self {
            hotend_max: 260.0,
            bed_max: 100.0,
            chamber_max: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Capabilities {
    pub auto_level: bool,
    pub filament_sensor: bool,
    pub power_resume: bool,
}

/// Command strings that differ between firmware families.
///
/// Temperature setters are stored as the bare verb; [`DialectCommands::set_hotend`]
/// and [`DialectCommands::set_bed`] append the `S` argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DialectCommands {
    pub identify: String,
    pub temperature_report: String,
    pub position_report: String,
    pub set_hotend: String,
    pub set_bed: String,
    pub home: String,
    pub mesh_level: String,
    pub pause: String,
    pub resume: String,
    pub emergency_stop: String,
    /// Brings the firmware back after an emergency stop
    pub clear_halt: String,
    pub fan_on: String,
    pub fan_off: String,
    pub reset_line_number: String,
}

impl DialectCommands {
    /// Stock command set for a dialect
    pub fn for_dialect(dialect: Dialect) -> Self {
        let base = Self::default();
        match dialect {
            Dialect::Marlin | Dialect::Unknown => base,
            Dialect::Klipper => Self {
                mesh_level: "BED_MESH_CALIBRATE".to_string(),
                pause: "PAUSE".to_string(),
                resume: "RESUME".to_string(),
                clear_halt: "FIRMWARE_RESTART".to_string(),
                ..base
            },
            Dialect::RepRapFirmware => Self {
                mesh_level: "G29 S0".to_string(),
                ..base
            },
            Dialect::Smoothieware => Self {
                mesh_level: "G32".to_string(),
                pause: "M600".to_string(),
                resume: "M601".to_string(),
                ..base
            },
        }
    }

    pub fn set_hotend(&self, celsius: f64) -> String {
        format!("{} S{}", self.set_hotend, format_temperature(celsius))
    }

    pub fn set_bed(&self, celsius: f64) -> String {
        format!("{} S{}", self.set_bed, format_temperature(celsius))
    }

    /// Commands that switch every heater off
    pub fn heaters_off(&self) -> Vec<String> {
        vec![self.set_hotend(0.0), self.set_bed(0.0)]
    }

    /// Heat both heaters without waiting
    pub fn preheat(&self, hotend: f64, bed: f64) -> Vec<String> {
        vec![self.set_bed(bed), self.set_hotend(hotend)]
    }
}

impl Default for DialectCommands {
    fn default() -> Self {
        Self {
            identify: "M115".to_string(),
            temperature_report: "M105".to_string(),
            position_report: "M114".to_string(),
            set_hotend: "M104".to_string(),
            set_bed: "M140".to_string(),
            home: "G28".to_string(),
            mesh_level: "G29".to_string(),
            pause: "M25".to_string(),
            resume: "M24".to_string(),
            emergency_stop: "M112".to_string(),
            clear_halt: "M999".to_string(),
            fan_on: "M106 S255".to_string(),
            fan_off: "M107".to_string(),
            reset_line_number: "M110 N0".to_string(),
        }
    }
}

fn format_temperature(celsius: f64) -> String {
    if celsius.fract() == 0.0 {
        format!("{}", celsius as i64)
    } else {
        format!("{:.1}", celsius)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionDefaults {
    pub baud_rate: u32,
    pub handshake_timeout_ms: u64,
    pub ack_timeout_ms: u64,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            handshake_timeout_ms: 2000,
            ack_timeout_ms: 5000,
        }
    }
}

/// Reference description of one printer model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrinterProfile {
    /// Registry key, lowercase and hyphenated
    pub name: String,
    pub brand: String,
    pub model: String,
    /// Extra spellings matched against the firmware's MACHINE_TYPE
    pub aliases: Vec<String>,
    pub dialect: Dialect,
    pub build_volume: BuildVolume,
    pub max_feedrate: AxisLimits,
    pub max_acceleration: AxisLimits,
    pub temperature_limits: TemperatureLimits,
    pub capabilities: Capabilities,
    pub commands: DialectCommands,
    pub connection: ConnectionDefaults,
    /// Used when the firmware's dialect is known but its machine type matches nothing
    pub default_for_dialect: bool,
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self {
            name: "new-printer".to_string(),
            brand: String::new(),
            model: String::new(),
            aliases: Vec::new(),
            dialect: Dialect::Marlin,
            build_volume: BuildVolume::default(),
            max_feedrate: AxisLimits::default(),
            max_acceleration: AxisLimits::new(1000.0, 1000.0, 100.0, 5000.0),
            temperature_limits: TemperatureLimits::default(),
            capabilities: Capabilities::default(),
            commands: DialectCommands::default(),
            connection: ConnectionDefaults::default(),
            default_for_dialect: false,
        }
    }
}

impl PrinterProfile {
    /// Start a profile with the stock commands for `dialect`
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            name: name.into(),
            dialect,
            commands: DialectCommands::for_dialect(dialect),
            ..Default::default()
        }
    }

    /// "Brand Model", or the registry name when both are empty
    pub fn display_name(&self) -> String {
        let joined = format!("{} {}", self.brand, self.model);
        let joined = joined.trim();
        if joined.is_empty() {
            self.name.clone()
        } else {
            joined.to_string()
        }
    }

    /// Every spelling this profile answers to: name, model and aliases
    pub fn match_keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.model.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|k| !k.trim().is_empty())
    }

    pub fn validate(&self) -> ProfileResult<()> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::MissingField("name".to_string()));
        }
        if !self.dialect.is_known() {
            return Err(ProfileError::UnknownDialect(self.name.clone()));
        }
        for (axis, value) in [
            ("x", self.build_volume.x),
            ("y", self.build_volume.y),
            ("z", self.build_volume.z),
        ] {
            if !(value > 0.0) {
                return Err(ProfileError::InvalidBuildVolume {
                    axis: axis.to_string(),
                    value,
                });
            }
        }
        let limits = &self.temperature_limits;
        if !(limits.hotend_max > 0.0) {
            return Err(ProfileError::ValueOutOfRange {
                field: "temperature_limits.hotend_max".to_string(),
                value: limits.hotend_max.to_string(),
            });
        }
        if !(limits.bed_max >= 0.0) {
            return Err(ProfileError::ValueOutOfRange {
                field: "temperature_limits.bed_max".to_string(),
                value: limits.bed_max.to_string(),
            });
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.connection.baud_rate) {
            return Err(ProfileError::UnsupportedBaudRate(self.connection.baud_rate));
        }
        if self.commands.identify.trim().is_empty() {
            return Err(ProfileError::MissingField("commands.identify".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_klipper_commands() {
        let cmds = DialectCommands::for_dialect(Dialect::Klipper);
        assert_eq!(cmds.pause, "PAUSE");
        assert_eq!(cmds.resume, "RESUME");
        assert_eq!(cmds.emergency_stop, "M112");
        assert_eq!(cmds.clear_halt, "FIRMWARE_RESTART");
        assert_eq!(cmds.identify, "M115");
        assert_eq!(DialectCommands::default().clear_halt, "M999");
    }

    #[test]
    fn test_temperature_commands() {
        let cmds = DialectCommands::default();
        assert_eq!(cmds.set_hotend(210.0), "M104 S210");
        assert_eq!(cmds.set_bed(60.5), "M140 S60.5");
        assert_eq!(cmds.heaters_off(), vec!["M104 S0", "M140 S0"]);
        assert_eq!(cmds.preheat(200.0, 60.0), vec!["M140 S60", "M104 S200"]);
    }

    #[test]
    fn test_validate() {
        let mut profile = PrinterProfile::new("test", Dialect::Marlin);
        assert!(profile.validate().is_ok());

        profile.build_volume.z = 0.0;
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::InvalidBuildVolume { .. })
        ));

        let mut profile = PrinterProfile::new("test", Dialect::Marlin);
        profile.connection.baud_rate = 1234;
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::UnsupportedBaudRate(1234))
        ));

        let profile = PrinterProfile::new("test", Dialect::Unknown);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "name": "my-printer", "dialect": "Klipper" }"#;
        let profile: PrinterProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.name, "my-printer");
        assert_eq!(profile.dialect, Dialect::Klipper);
        assert_eq!(profile.connection.baud_rate, 115200);
        assert_eq!(profile.display_name(), "my-printer");
    }
}
