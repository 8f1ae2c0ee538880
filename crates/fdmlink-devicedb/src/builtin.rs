//! Built-in printer catalog

use fdmlink_core::Dialect;

use crate::model::{
    AxisLimits, BuildVolume, Capabilities, ConnectionDefaults, PrinterProfile, TemperatureLimits,
};

/// Name of the profile used when the dialect cannot be classified
pub const FALLBACK_PROFILE: &str = "generic-marlin";

/// Conservative Marlin profile that is safe on any Marlin-speaking printer
pub fn generic_marlin() -> PrinterProfile {
    PrinterProfile {
        brand: "Generic".to_string(),
        model: "Marlin printer".to_string(),
        default_for_dialect: true,
        ..PrinterProfile::new(FALLBACK_PROFILE, Dialect::Marlin)
    }
}

/// Every profile shipped with the crate
pub fn builtin_profiles() -> Vec<PrinterProfile> {
    vec![
        generic_marlin(),
        PrinterProfile {
            brand: "Creality".to_string(),
            model: "Ender-3".to_string(),
            aliases: vec!["Ender 3".to_string(), "Ender-3 Pro".to_string()],
            build_volume: BuildVolume {
                x: 220.0,
                y: 220.0,
                z: 250.0,
            },
            max_feedrate: AxisLimits::new(500.0, 500.0, 5.0, 25.0),
            max_acceleration: AxisLimits::new(500.0, 500.0, 100.0, 5000.0),
            temperature_limits: TemperatureLimits {
                hotend_max: 260.0,
                bed_max: 100.0,
                chamber_max: None,
            },
            ..PrinterProfile::new("creality-ender-3", Dialect::Marlin)
        },
        PrinterProfile {
            brand: "Creality".to_string(),
            model: "Ender-3 V2".to_string(),
            aliases: vec!["Ender 3 V2".to_string()],
            build_volume: BuildVolume {
                x: 220.0,
                y: 220.0,
                z: 250.0,
            },
            max_feedrate: AxisLimits::new(500.0, 500.0, 5.0, 25.0),
            max_acceleration: AxisLimits::new(500.0, 500.0, 100.0, 5000.0),
            capabilities: Capabilities {
                power_resume: true,
                ..Default::default()
            },
            ..PrinterProfile::new("creality-ender-3-v2", Dialect::Marlin)
        },
        PrinterProfile {
            brand: "Prusa".to_string(),
            model: "i3 MK3S".to_string(),
            aliases: vec!["Prusa i3 MK3S".to_string(), "MK3S".to_string()],
            build_volume: BuildVolume {
                x: 250.0,
                y: 210.0,
                z: 210.0,
            },
            max_feedrate: AxisLimits::new(200.0, 200.0, 12.0, 120.0),
            max_acceleration: AxisLimits::new(1000.0, 1000.0, 200.0, 5000.0),
            temperature_limits: TemperatureLimits {
                hotend_max: 300.0,
                bed_max: 120.0,
                chamber_max: None,
            },
            capabilities: Capabilities {
                auto_level: true,
                filament_sensor: true,
                power_resume: true,
            },
            commands: crate::model::DialectCommands {
                mesh_level: "G80".to_string(),
                ..Default::default()
            },
            ..PrinterProfile::new("prusa-i3-mk3s", Dialect::Marlin)
        },
        PrinterProfile {
            brand: "Generic".to_string(),
            model: "Klipper printer".to_string(),
            default_for_dialect: true,
            connection: ConnectionDefaults {
                baud_rate: 250000,
                ..Default::default()
            },
            ..PrinterProfile::new("generic-klipper", Dialect::Klipper)
        },
        PrinterProfile {
            brand: "Voron".to_string(),
            model: "2.4 350".to_string(),
            aliases: vec!["Voron 2.4".to_string(), "Voron2.4".to_string()],
            build_volume: BuildVolume {
                x: 350.0,
                y: 350.0,
                z: 340.0,
            },
            max_feedrate: AxisLimits::new(500.0, 500.0, 15.0, 60.0),
            max_acceleration: AxisLimits::new(5000.0, 5000.0, 350.0, 5000.0),
            temperature_limits: TemperatureLimits {
                hotend_max: 300.0,
                bed_max: 120.0,
                chamber_max: Some(70.0),
            },
            capabilities: Capabilities {
                auto_level: true,
                filament_sensor: false,
                power_resume: false,
            },
            connection: ConnectionDefaults {
                baud_rate: 250000,
                ..Default::default()
            },
            ..PrinterProfile::new("voron-2.4-350", Dialect::Klipper)
        },
        PrinterProfile {
            brand: "Duet3D".to_string(),
            model: "Duet printer".to_string(),
            aliases: vec!["Duet 2".to_string(), "Duet 3".to_string()],
            build_volume: BuildVolume {
                x: 300.0,
                y: 300.0,
                z: 300.0,
            },
            temperature_limits: TemperatureLimits {
                hotend_max: 285.0,
                bed_max: 120.0,
                chamber_max: None,
            },
            capabilities: Capabilities {
                auto_level: true,
                filament_sensor: true,
                power_resume: true,
            },
            default_for_dialect: true,
            ..PrinterProfile::new("duet-generic", Dialect::RepRapFirmware)
        },
        PrinterProfile {
            brand: "Smoothieboard".to_string(),
            model: "Smoothie printer".to_string(),
            aliases: vec!["Smoothieboard".to_string()],
            temperature_limits: TemperatureLimits {
                hotend_max: 250.0,
                bed_max: 100.0,
                chamber_max: None,
            },
            default_for_dialect: true,
            ..PrinterProfile::new("smoothie-generic", Dialect::Smoothieware)
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtins_validate() {
        for profile in builtin_profiles() {
            profile
                .validate()
                .unwrap_or_else(|e| panic!("{} invalid: {}", profile.name, e));
        }
    }

    #[test]
    fn test_one_default_per_dialect() {
        let profiles = builtin_profiles();
        for dialect in Dialect::KNOWN {
            let defaults = profiles
                .iter()
                .filter(|p| p.dialect == dialect && p.default_for_dialect)
                .count();
            assert_eq!(defaults, 1, "{dialect}");
        }
    }

    #[test]
    fn test_names_unique() {
        let profiles = builtin_profiles();
        let names: HashSet<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.len(), profiles.len());
        assert!(names.contains(FALLBACK_PROFILE));
    }
}
