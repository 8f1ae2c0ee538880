//! Data models for fdmlink
//!
//! Connection status, temperatures, positions, printer identity, print
//! jobs and the streaming state machine. All of these are plain values;
//! the engine owns the single lock-guarded container that holds them.

mod job;
mod streaming;

pub use job::{JobStatus, PrintJob};
pub use streaming::{StreamState, StreamingStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Connection status of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No link open
    #[default]
    Disconnected,
    /// Opening the link and running the handshake
    Connecting,
    /// Handshake complete
    Connected,
    /// Connected with nothing streaming
    Idle,
    /// A job is streaming
    Printing,
    /// A job is paused
    Paused,
    /// The link failed and could not be recovered
    Error,
    /// The monitor lost the device and is trying to reconnect
    Offline,
}

impl ConnectionStatus {
    /// Idle/Connected/Printing/Paused all count as a live connection
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected
                | ConnectionStatus::Idle
                | ConnectionStatus::Printing
                | ConnectionStatus::Paused
        )
    }

    /// Whether interactive commands may be sent in this status
    pub fn accepts_commands(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::Idle | ConnectionStatus::Printing
        )
    }

    /// Check if a transition from this status to `target` is valid.
    ///
    /// - Disconnected → Connecting
    /// - Connecting → Connected, Error, Disconnected
    /// - Connected/Idle ⇄ Printing ⇄ Paused
    /// - any live status → Offline, Error, Disconnected
    /// - Offline → Connected/Idle (reconnected), Error, Disconnected
    /// - Error → Connecting, Disconnected
    pub fn can_transition_to(&self, target: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        if *self == target {
            return true;
        }
        match (self, target) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Disconnected, _) => false,
            (Connecting, Connected | Error) => true,
            (Connecting, _) => false,
            (Error, Connecting) => true,
            (Error, _) => false,
            (Offline, Connected | Idle | Error) => true,
            (Offline, _) => false,
            (Connected | Idle, Idle | Connected | Printing) => true,
            (Printing, Idle | Paused) => true,
            (Paused, Printing | Idle) => true,
            (_, Offline | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Idle => write!(f, "Idle"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
            Self::Error => write!(f, "Error"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Firmware dialect (command vocabulary and response format family)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// Marlin and its derivatives (Prusa-Firmware, Creality builds)
    Marlin,
    /// Klipper host + MCU
    Klipper,
    /// RepRapFirmware (Duet boards)
    RepRapFirmware,
    /// Smoothieware
    Smoothieware,
    /// Not recognised
    #[default]
    Unknown,
}

impl Dialect {
    /// All known dialects, in classification priority order
    pub const KNOWN: [Dialect; 4] = [
        Dialect::Klipper,
        Dialect::RepRapFirmware,
        Dialect::Smoothieware,
        Dialect::Marlin,
    ];

    /// Whether this is a recognised dialect
    pub fn is_known(&self) -> bool {
        !matches!(self, Dialect::Unknown)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marlin => write!(f, "Marlin"),
            Self::Klipper => write!(f, "Klipper"),
            Self::RepRapFirmware => write!(f, "RepRapFirmware"),
            Self::Smoothieware => write!(f, "Smoothieware"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Hotend/bed/chamber temperatures in °C
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureSnapshot {
    /// Current hotend temperature
    pub hotend_current: f64,
    /// Hotend target (0 = off)
    pub hotend_target: f64,
    /// Current bed temperature
    pub bed_current: f64,
    /// Bed target (0 = off)
    pub bed_target: f64,
    /// Current chamber temperature, if the printer reports one
    pub chamber_current: Option<f64>,
    /// Chamber target, if the printer reports one
    pub chamber_target: Option<f64>,
    /// When this snapshot was taken
    pub updated_at: Option<DateTime<Utc>>,
}

impl TemperatureSnapshot {
    /// Whether both heaters are within `tolerance` of their targets
    pub fn at_target(&self, tolerance: f64) -> bool {
        (self.hotend_current - self.hotend_target).abs() <= tolerance
            && (self.bed_current - self.bed_target).abs() <= tolerance
    }

    /// Whether any heater has a non-zero target
    pub fn any_heater_on(&self) -> bool {
        self.hotend_target > 0.0
            || self.bed_target > 0.0
            || self.chamber_target.is_some_and(|t| t > 0.0)
    }
}

/// Toolhead position in mm, extruder in mm of filament
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// Extruder axis
    pub e: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}",
            self.x, self.y, self.z, self.e
        )
    }
}

/// Identity of the connected printer, built from the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterInfo {
    /// Unique id for this connection
    pub id: String,
    /// Human-readable name (profile name or machine type)
    pub name: String,
    /// Port the printer is attached to
    pub port: String,
    /// Baud rate in use
    pub baud_rate: u32,
    /// Classified dialect
    pub dialect: Dialect,
    /// Raw firmware string from the identification reply
    pub firmware: String,
    /// Firmware name (e.g. "Marlin")
    pub firmware_name: Option<String>,
    /// Firmware version (e.g. "2.1.2")
    pub firmware_version: Option<String>,
    /// Machine type reported by the firmware
    pub machine_type: Option<String>,
    /// Name of the printer profile in use
    pub profile_name: String,
    /// True when the profile came from the explicit fallback rather than a match
    pub profile_fallback: bool,
    /// Capability flags reported by the firmware (`Cap:NAME:1`)
    pub capabilities: BTreeMap<String, bool>,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
}

impl PrinterInfo {
    /// Check a firmware-reported capability
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .get(&name.to_ascii_uppercase())
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_statuses() {
        assert!(ConnectionStatus::Idle.is_connected());
        assert!(ConnectionStatus::Paused.is_connected());
        assert!(!ConnectionStatus::Offline.is_connected());
        assert!(!ConnectionStatus::Error.is_connected());

        assert!(ConnectionStatus::Printing.accepts_commands());
        assert!(!ConnectionStatus::Paused.accepts_commands());
        assert!(!ConnectionStatus::Disconnected.accepts_commands());
    }

    #[test]
    fn test_status_transitions() {
        use ConnectionStatus::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Printing));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Idle.can_transition_to(Printing));
        assert!(Printing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Idle));
        assert!(Printing.can_transition_to(Offline));
        assert!(Offline.can_transition_to(Idle));
        assert!(!Error.can_transition_to(Printing));
        assert!(Error.can_transition_to(Disconnected));
    }

    #[test]
    fn test_temperature_helpers() {
        let temps = TemperatureSnapshot {
            hotend_current: 199.5,
            hotend_target: 200.0,
            bed_current: 60.0,
            bed_target: 60.0,
            ..Default::default()
        };
        assert!(temps.at_target(1.0));
        assert!(temps.any_heater_on());
        assert!(!TemperatureSnapshot::default().any_heater_on());
    }
}
