//! Firmware dialect classification.
//!
//! Matching free-text identification replies against regex signatures is
//! best-effort, so [`classify`] reports a confidence and falls back to
//! [`Dialect::Unknown`] with confidence 0 instead of guessing.

use fdmlink_core::Dialect;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Result of classifying an identification reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub dialect: Dialect,
    /// 0.0 for unknown, up to 1.0 for an explicit FIRMWARE_NAME match
    pub confidence: f32,
    pub firmware_name: Option<String>,
    pub firmware_version: Option<String>,
    pub machine_type: Option<String>,
}

impl Classification {
    pub fn is_known(&self) -> bool {
        self.dialect.is_known()
    }
}

struct Signature {
    dialect: Dialect,
    pattern: Regex,
    confidence: f32,
}

fn signatures() -> &'static [Signature] {
    static SIGNATURES: OnceLock<Vec<Signature>> = OnceLock::new();
    SIGNATURES.get_or_init(|| {
        [
            (Dialect::Klipper, r"(?i)FIRMWARE_NAME:\s*Klipper", 1.0),
            (Dialect::Klipper, r"(?i)\bklipper\b", 0.8),
            (Dialect::RepRapFirmware, r"(?i)FIRMWARE_NAME:\s*RepRapFirmware", 1.0),
            (Dialect::RepRapFirmware, r"(?i)\bRepRapFirmware\b", 0.9),
            (Dialect::RepRapFirmware, r"(?i)\bDuet\s*(?:\d|WiFi|Ethernet|Maestro)", 0.6),
            (Dialect::Smoothieware, r"(?i)FIRMWARE_NAME:\s*Smoothieware", 1.0),
            (Dialect::Smoothieware, r"(?i)\bsmoothie", 0.8),
            (Dialect::Marlin, r"(?i)FIRMWARE_NAME:\s*Marlin", 1.0),
            (Dialect::Marlin, r"(?i)FIRMWARE_NAME:\s*Prusa-Firmware", 0.95),
            (Dialect::Marlin, r"(?i)\bMarlin\b", 0.8),
            (Dialect::Marlin, r"(?i)\bstart\b.*\becho:", 0.4),
        ]
        .into_iter()
        .map(|(dialect, pattern, confidence)| Signature {
            dialect,
            pattern: Regex::new(pattern).expect("invalid dialect signature"),
            confidence,
        })
        .collect()
    })
}

fn field_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("invalid firmware field regex"))
}

/// `FIRMWARE_NAME:` token, e.g. "Marlin"
pub fn firmware_name(response: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    field_regex(&RE, r"FIRMWARE_NAME:\s*([^\s,(]+)")
        .captures(response)
        .map(|c| c[1].to_string())
}

/// `FIRMWARE_VERSION:` value, or the version token following the firmware name
pub fn firmware_version(response: &str) -> Option<String> {
    static EXPLICIT: OnceLock<Regex> = OnceLock::new();
    static INLINE: OnceLock<Regex> = OnceLock::new();
    field_regex(&EXPLICIT, r"FIRMWARE_VERSION:\s*([^\s,]+)")
        .captures(response)
        .or_else(|| {
            field_regex(&INLINE, r"FIRMWARE_NAME:\s*[^\s,(]+[ \t]+v?(\d[^\s,()]*)")
                .captures(response)
        })
        .map(|c| c[1].to_string())
}

/// `MACHINE_TYPE:` value up to the next `KEY:` field
pub fn machine_type(response: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    field_regex(&RE, r"(?m)MACHINE_TYPE:\s*(.+?)\s*(?:\s[A-Z][A-Z_]+:|,|$)")
        .captures(response)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Classify an identification reply.
///
/// The strongest matching signature wins; ties go to the earlier dialect in
/// [`Dialect::KNOWN`] order so a Klipper host that also mentions Marlin
/// compatibility is still reported as Klipper.
pub fn classify(response: &str) -> Classification {
    let mut best: Option<&Signature> = None;
    for sig in signatures() {
        if !sig.pattern.is_match(response) {
            continue;
        }
        if best.is_none_or(|b| sig.confidence > b.confidence) {
            best = Some(sig);
        }
    }

    let (dialect, confidence) = best.map_or((Dialect::Unknown, 0.0), |s| (s.dialect, s.confidence));

    let classification = Classification {
        dialect,
        confidence,
        firmware_name: firmware_name(response),
        firmware_version: firmware_version(response),
        machine_type: machine_type(response),
    };
    tracing::debug!(
        "Classified firmware as {} ({:.2})",
        classification.dialect,
        classification.confidence
    );
    classification
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARLIN: &str = "FIRMWARE_NAME:Marlin 1.1.9 (Github) SOURCE_CODE_URL:https://github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:Ender-3 EXTRUDER_COUNT:1 UUID:cede2a2f-41a2-4748-9b12-c55c62f367ff\nok";

    #[test]
    fn test_marlin_ender() {
        let c = classify(MARLIN);
        assert_eq!(c.dialect, Dialect::Marlin);
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.firmware_name.as_deref(), Some("Marlin"));
        assert_eq!(c.firmware_version.as_deref(), Some("1.1.9"));
        assert_eq!(c.machine_type.as_deref(), Some("Ender-3"));
    }

    #[test]
    fn test_klipper() {
        let c = classify("ok FIRMWARE_NAME:Klipper FIRMWARE_VERSION:v0.12.0-85-gd785b396");
        assert_eq!(c.dialect, Dialect::Klipper);
        assert_eq!(c.firmware_version.as_deref(), Some("v0.12.0-85-gd785b396"));
        assert_eq!(c.machine_type, None);
    }

    #[test]
    fn test_reprap_and_smoothie() {
        let c = classify(
            "FIRMWARE_NAME: RepRapFirmware for Duet 2 WiFi/Ethernet FIRMWARE_VERSION: 3.4.5 ELECTRONICS: Duet WiFi 1.02 or later",
        );
        assert_eq!(c.dialect, Dialect::RepRapFirmware);
        assert_eq!(c.firmware_version.as_deref(), Some("3.4.5"));

        let c = classify("FIRMWARE_NAME:Smoothieware, FIRMWARE_URL:http%3A//smoothieware.org, FIRMWARE_VERSION:edge-3332442");
        assert_eq!(c.dialect, Dialect::Smoothieware);
        assert_eq!(c.firmware_name.as_deref(), Some("Smoothieware"));
    }

    #[test]
    fn test_multi_word_machine_type() {
        let c = classify("FIRMWARE_NAME:Prusa-Firmware 3.13.2 based on Marlin MACHINE_TYPE:Prusa i3 MK3S EXTRUDER_COUNT:1");
        assert_eq!(c.dialect, Dialect::Marlin);
        assert_eq!(c.machine_type.as_deref(), Some("Prusa i3 MK3S"));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("firmware_name:marlin").dialect, Dialect::Marlin);
    }

    #[test]
    fn test_unknown() {
        let c = classify("Grbl 1.1h ['$' for help]");
        assert_eq!(c.dialect, Dialect::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert!(!c.is_known());
    }
}
