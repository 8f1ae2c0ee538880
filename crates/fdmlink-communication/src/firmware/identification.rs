//! Turning an identification reply into a [`PrinterInfo`].

use chrono::Utc;
use fdmlink_core::PrinterInfo;
use fdmlink_devicedb::{classify, Classification, ProfileMatch, ProfileRegistry};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Classification plus profile choice for one handshake
#[derive(Debug, Clone)]
pub struct Identification {
    pub classification: Classification,
    pub profile: ProfileMatch,
    pub capabilities: BTreeMap<String, bool>,
    /// Identification text with the terminating ack removed
    pub firmware: String,
}

impl Identification {
    /// Classify `response` and pick the best profile from `registry`
    pub fn from_response(response: &str, registry: &ProfileRegistry) -> Self {
        let classification = classify(response);
        let profile = registry.best_match(
            classification.dialect,
            classification.machine_type.as_deref(),
        );
        if profile.fallback {
            tracing::warn!(
                "Unrecognised firmware, using fallback profile '{}'",
                profile.profile.name
            );
        }
        Self {
            capabilities: parse_capabilities(response),
            firmware: firmware_text(response),
            classification,
            profile,
        }
    }

    /// Build the connection record
    pub fn into_printer_info(self, port: &str, baud_rate: u32) -> PrinterInfo {
        let name = if self.profile.fallback {
            self.classification
                .machine_type
                .clone()
                .unwrap_or_else(|| self.profile.profile.display_name())
        } else {
            self.profile.profile.display_name()
        };
        PrinterInfo {
            id: Uuid::new_v4().to_string(),
            name,
            port: port.to_string(),
            baud_rate,
            dialect: self.classification.dialect,
            firmware: self.firmware,
            firmware_name: self.classification.firmware_name,
            firmware_version: self.classification.firmware_version,
            machine_type: self.classification.machine_type,
            profile_name: self.profile.profile.name,
            profile_fallback: self.profile.fallback,
            capabilities: self.capabilities,
            connected_at: Utc::now(),
        }
    }
}

/// Marlin `Cap:NAME:0|1` lines, keyed by upper-case name
pub fn parse_capabilities(response: &str) -> BTreeMap<String, bool> {
    response
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Cap:"))
        .filter_map(|rest| rest.rsplit_once(':'))
        .map(|(name, flag)| (name.trim().to_ascii_uppercase(), flag.trim() == "1"))
        .collect()
}

fn firmware_text(response: &str) -> String {
    response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "ok" && !l.starts_with("Cap:"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdmlink_core::Dialect;

    const ENDER3: &str = "FIRMWARE_NAME:Marlin 1.1.9 (Github) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:Ender-3 EXTRUDER_COUNT:1\nCap:AUTOREPORT_TEMP:1\nCap:EEPROM:0\nok";

    #[test]
    fn test_capabilities() {
        let caps = parse_capabilities(ENDER3);
        assert_eq!(caps.get("AUTOREPORT_TEMP"), Some(&true));
        assert_eq!(caps.get("EEPROM"), Some(&false));
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_ender3_identification() {
        let registry = ProfileRegistry::new();
        let info = Identification::from_response(ENDER3, &registry).into_printer_info("/dev/ttyUSB0", 115200);
        assert_eq!(info.dialect, Dialect::Marlin);
        assert_eq!(info.firmware_version.as_deref(), Some("1.1.9"));
        assert_eq!(info.machine_type.as_deref(), Some("Ender-3"));
        assert_eq!(info.profile_name, "creality-ender-3");
        assert!(!info.profile_fallback);
        assert!(info.has_capability("autoreport_temp"));
        assert!(!info.firmware.contains("Cap:"));
    }

    #[test]
    fn test_unknown_firmware_uses_fallback() {
        let registry = ProfileRegistry::new();
        let info = Identification::from_response("hello there\nok", &registry)
            .into_printer_info("/dev/ttyACM0", 250000);
        assert_eq!(info.dialect, Dialect::Unknown);
        assert!(info.profile_fallback);
        assert_eq!(info.profile_name, "generic-marlin");
    }
}
