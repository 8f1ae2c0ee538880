//! Response parser for FDM firmware replies
//!
//! Classifies single reply lines (acks, errors, temperature and position
//! reports) and extracts readings from them. Marlin, Klipper,
//! RepRapFirmware and Smoothieware share this report format closely
//! enough that one parser covers them.

use chrono::Utc;
use fdmlink_core::{Position, TemperatureSnapshot};
use regex::Regex;
use std::sync::OnceLock;

/// Parsed reply line
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareResponse {
    /// Bare acknowledgement
    Ok,
    /// Rejection with message
    Error(String),
    /// Temperature report (possibly on an `ok` line)
    Temperature(TemperatureSnapshot),
    /// Position report (possibly on an `ok` line)
    Position(Position),
    /// `echo:busy: processing` keep-alive
    Busy,
    /// Anything else
    Raw(String),
}

/// Parse a single line from the printer
pub fn parse_line(line: &str) -> Option<FirmwareResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(temps) = parse_temperatures(line) {
        return Some(FirmwareResponse::Temperature(temps));
    }
    if let Some(position) = parse_position(line) {
        return Some(FirmwareResponse::Position(position));
    }
    if line == "ok" || line.starts_with("ok ") {
        return Some(FirmwareResponse::Ok);
    }
    if crate::communication::is_rejection(line) {
        let message = line[5..].trim_start_matches(':').trim().to_string();
        return Some(FirmwareResponse::Error(message));
    }
    if line.starts_with("echo:busy") {
        return Some(FirmwareResponse::Busy);
    }
    Some(FirmwareResponse::Raw(line.to_string()))
}

fn heater_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(T0|T|B|C):\s*(-?\d+(?:\.\d+)?)\s*(?:/\s*(-?\d+(?:\.\d+)?))?")
            .expect("invalid heater regex")
    })
}

/// Extract a temperature report such as `ok T:200.0 /200.0 B:60.0 /60.0`.
///
/// `T0:` is used when both `T:` and `T0:` are present only if `T:` is
/// missing. Returns `None` unless a hotend reading is present.
pub fn parse_temperatures(line: &str) -> Option<TemperatureSnapshot> {
    let mut snapshot = TemperatureSnapshot::default();
    let mut saw_hotend = false;

    for caps in heater_regex().captures_iter(line) {
        let current: f64 = caps[2].parse().ok()?;
        let target: f64 = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        match &caps[1] {
            "T" => {
                snapshot.hotend_current = current;
                snapshot.hotend_target = target;
                saw_hotend = true;
            }
            "T0" if !saw_hotend => {
                snapshot.hotend_current = current;
                snapshot.hotend_target = target;
                saw_hotend = true;
            }
            "B" => {
                snapshot.bed_current = current;
                snapshot.bed_target = target;
            }
            "C" => {
                snapshot.chamber_current = Some(current);
                snapshot.chamber_target = Some(target);
            }
            _ => {}
        }
    }

    if !saw_hotend {
        return None;
    }
    snapshot.updated_at = Some(Utc::now());
    Some(snapshot)
}

/// Extract a position report such as `X:10.00 Y:0.00 Z:0.20 E:1.50 Count ...`.
///
/// Only the first occurrence of each axis counts; Marlin repeats them after
/// `Count` in stepper units.
pub fn parse_position(line: &str) -> Option<Position> {
    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut e = None;

    for part in line.split_whitespace() {
        if part.eq_ignore_ascii_case("count") {
            break;
        }
        let Some((axis, value)) = part.split_once(':') else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        match axis {
            "X" if x.is_none() => x = Some(value),
            "Y" if y.is_none() => y = Some(value),
            "Z" if z.is_none() => z = Some(value),
            "E" if e.is_none() => e = Some(value),
            _ => {}
        }
    }

    Some(Position {
        x: x?,
        y: y?,
        z: z?,
        e: e.unwrap_or(0.0),
    })
}
