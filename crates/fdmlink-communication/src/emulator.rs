//! In-process printer emulator
//!
//! Answers the same text commands a real FDM printer does, tracks position
//! and heater state, and simulates heating with a background tick. Latency
//! and random rejections can be injected to exercise timeout and retry
//! paths without hardware.

use crate::gcode::unframe_line;
use chrono::Utc;
use fdmlink_core::{Dialect, Position, TemperatureSnapshot};
use fdmlink_settings::EmulatorSettings;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Heating rates in °C per second
const HOTEND_HEAT_RATE: f64 = 8.0;
const HOTEND_COOL_RATE: f64 = 3.0;
const BED_HEAT_RATE: f64 = 1.5;
const BED_COOL_RATE: f64 = 0.5;

const HALTED: &str = "Error:Printer halted. kill() called!";

#[derive(Debug, Clone)]
struct Heater {
    current: f64,
    target: f64,
}

impl Heater {
    fn step(&mut self, dt: f64, heat_rate: f64, cool_rate: f64, ambient: f64) {
        let goal = if self.target > 0.0 { self.target } else { ambient };
        if self.current < goal {
            self.current = (self.current + heat_rate * dt).min(goal);
        } else if self.current > goal {
            self.current = (self.current - cool_rate * dt).max(goal);
        }
    }
}

#[derive(Debug, Clone)]
struct EmulatorState {
    position: Position,
    absolute: bool,
    hotend: Heater,
    bed: Heater,
    fan_speed: u8,
    homed: bool,
    paused: bool,
    halted: bool,
    last_line: u32,
}

impl EmulatorState {
    fn new(ambient: f64) -> Self {
        Self {
            position: Position::default(),
            absolute: true,
            hotend: Heater {
                current: ambient,
                target: 0.0,
            },
            bed: Heater {
                current: ambient,
                target: 0.0,
            },
            fan_speed: 0,
            homed: false,
            paused: false,
            halted: false,
            last_line: 0,
        }
    }
}

/// Simulated printer
pub struct DeviceEmulator {
    settings: EmulatorSettings,
    state: Mutex<EmulatorState>,
    rng: Mutex<StdRng>,
    unplugged: AtomicBool,
}

impl DeviceEmulator {
    /// Create an emulator from settings
    pub fn new(settings: EmulatorSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            state: Mutex::new(EmulatorState::new(settings.ambient_temperature)),
            rng: Mutex::new(rng),
            unplugged: AtomicBool::new(false),
            settings,
        }
    }

    /// Marlin emulator with default settings
    pub fn marlin() -> Self {
        Self::new(EmulatorSettings::default())
    }

    pub fn dialect(&self) -> Dialect {
        self.settings.dialect
    }

    pub fn settings(&self) -> &EmulatorSettings {
        &self.settings
    }

    /// Current heater readings
    pub fn snapshot(&self) -> TemperatureSnapshot {
        let state = self.state.lock();
        TemperatureSnapshot {
            hotend_current: state.hotend.current,
            hotend_target: state.hotend.target,
            bed_current: state.bed.current,
            bed_target: state.bed.target,
            chamber_current: None,
            chamber_target: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    pub fn is_homed(&self) -> bool {
        self.state.lock().homed
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    pub fn fan_speed(&self) -> u8 {
        self.state.lock().fan_speed
    }

    /// Simulate a pulled cable: lines are swallowed without a reply until
    /// plugged back in
    pub fn set_unplugged(&self, unplugged: bool) {
        self.unplugged.store(unplugged, Ordering::Release);
    }

    pub fn is_unplugged(&self) -> bool {
        self.unplugged.load(Ordering::Acquire)
    }

    /// Power-cycle: back to ambient, unhomed, line counter cleared
    pub fn reset(&self) {
        *self.state.lock() = EmulatorState::new(self.settings.ambient_temperature);
    }

    /// Advance heaters by `dt`
    pub fn tick(&self, dt: Duration) {
        let dt = dt.as_secs_f64();
        let ambient = self.settings.ambient_temperature;
        let mut state = self.state.lock();
        state
            .hotend
            .step(dt, HOTEND_HEAT_RATE, HOTEND_COOL_RATE, ambient);
        state.bed.step(dt, BED_HEAT_RATE, BED_COOL_RATE, ambient);
    }

    /// Run [`tick`](Self::tick) every `tick_interval` until the task is aborted
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let emulator = Arc::clone(self);
        let interval = self.settings.tick_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                emulator.tick(interval);
            }
        })
    }

    /// [`process`](Self::process) after the configured latency
    pub async fn respond(&self, line: &str) -> String {
        let latency = self.settings.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_unplugged() {
            return String::new();
        }
        self.process(line)
    }

    /// Handle one received line and return the full reply, one line per row
    pub fn process(&self, line: &str) -> String {
        let line = line.trim();
        let command = match unframe_line(line) {
            Ok(Some((number, command))) => {
                let mut state = self.state.lock();
                if !is_line_reset(command) && number != state.last_line + 1 {
                    return format!(
                        "Error:Line Number is not Last Line Number+1, Last Line: {}",
                        state.last_line
                    );
                }
                state.last_line = number;
                command
            }
            Ok(None) => line,
            Err(_) => {
                let last = self.state.lock().last_line;
                return format!("Error:checksum mismatch, Last Line: {}", last);
            }
        };

        let command = command.split(';').next().unwrap_or("").trim();
        if command.is_empty() {
            return "ok".to_string();
        }
        let mut words = command.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_uppercase();
        let args: Vec<&str> = words.collect();

        if self.state.lock().halted && !matches!(verb.as_str(), "M999" | "FIRMWARE_RESTART") {
            return HALTED.to_string();
        }

        if self.inject_error(&verb) {
            return format!("Error:simulated fault on {}", verb);
        }

        self.execute(&verb, &args)
    }

    fn inject_error(&self, verb: &str) -> bool {
        let p = self.settings.error_probability;
        if p <= 0.0 || matches!(verb, "M112" | "M115" | "M110" | "M999" | "FIRMWARE_RESTART") {
            return false;
        }
        self.rng.lock().random_bool(p.min(1.0))
    }

    fn execute(&self, verb: &str, args: &[&str]) -> String {
        let mut state = self.state.lock();
        match verb {
            "M110" => {
                state.last_line = word_value(args, 'N').map(|n| n as u32).unwrap_or(0);
                "ok".to_string()
            }
            "M112" => {
                state.halted = true;
                state.hotend.target = 0.0;
                state.bed.target = 0.0;
                tracing::warn!("Emulator halted by M112");
                HALTED.to_string()
            }
            "M999" | "FIRMWARE_RESTART" => {
                state.halted = false;
                state.last_line = 0;
                "ok".to_string()
            }
            "M115" => self.identification(),
            "M105" => format!(
                "ok T:{:.2}/{:.2} B:{:.2}/{:.2}",
                state.hotend.current, state.hotend.target, state.bed.current, state.bed.target
            ),
            "M114" => {
                let p = state.position;
                format!(
                    "ok X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}",
                    p.x, p.y, p.z, p.e
                )
            }
            "M104" | "M109" => {
                if let Some(t) = word_value(args, 'S') {
                    state.hotend.target = t.max(0.0);
                    if verb == "M109" {
                        state.hotend.current = state.hotend.target;
                    }
                }
                "ok".to_string()
            }
            "M140" | "M190" => {
                if let Some(t) = word_value(args, 'S') {
                    state.bed.target = t.max(0.0);
                    if verb == "M190" {
                        state.bed.current = state.bed.target;
                    }
                }
                "ok".to_string()
            }
            "M106" => {
                state.fan_speed = word_value(args, 'S').unwrap_or(255.0).clamp(0.0, 255.0) as u8;
                "ok".to_string()
            }
            "M107" => {
                state.fan_speed = 0;
                "ok".to_string()
            }
            "G28" => {
                let axes: Vec<char> = args
                    .iter()
                    .filter_map(|a| a.chars().next())
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                let all = axes.is_empty();
                if all || axes.contains(&'X') {
                    state.position.x = 0.0;
                }
                if all || axes.contains(&'Y') {
                    state.position.y = 0.0;
                }
                if all || axes.contains(&'Z') {
                    state.position.z = 0.0;
                }
                state.homed = true;
                "ok".to_string()
            }
            "G0" | "G1" => {
                let absolute = state.absolute;
                let pos = &mut state.position;
                for (axis, slot) in [
                    ('X', &mut pos.x),
                    ('Y', &mut pos.y),
                    ('Z', &mut pos.z),
                    ('E', &mut pos.e),
                ] {
                    if let Some(v) = word_value(args, axis) {
                        *slot = if absolute { v } else { *slot + v };
                    }
                }
                "ok".to_string()
            }
            "G90" => {
                state.absolute = true;
                "ok".to_string()
            }
            "G91" => {
                state.absolute = false;
                "ok".to_string()
            }
            "G92" => {
                let pos = &mut state.position;
                for (axis, slot) in [
                    ('X', &mut pos.x),
                    ('Y', &mut pos.y),
                    ('Z', &mut pos.z),
                    ('E', &mut pos.e),
                ] {
                    if let Some(v) = word_value(args, axis) {
                        *slot = v;
                    }
                }
                "ok".to_string()
            }
            "M25" | "PAUSE" | "M600" => {
                state.paused = true;
                "ok".to_string()
            }
            "M24" | "RESUME" | "M601" => {
                state.paused = false;
                "ok".to_string()
            }
            "M84" | "M18" => {
                state.homed = false;
                "ok".to_string()
            }
            _ => "ok".to_string(),
        }
    }

    fn identification(&self) -> String {
        match self.settings.dialect {
            Dialect::Klipper => {
                "FIRMWARE_NAME:Klipper FIRMWARE_VERSION:v0.12.0 MACHINE_TYPE:fdmlink emulator\nok"
                    .to_string()
            }
            Dialect::RepRapFirmware => "FIRMWARE_NAME: RepRapFirmware for Duet 3 FIRMWARE_VERSION: 3.5.0 ELECTRONICS: fdmlink emulator\nok".to_string(),
            Dialect::Smoothieware => {
                "FIRMWARE_NAME:Smoothieware, FIRMWARE_VERSION:edge-emulated, MACHINE_TYPE:fdmlink emulator\nok"
                    .to_string()
            }
            Dialect::Marlin | Dialect::Unknown => [
                "FIRMWARE_NAME:Marlin 2.1.2 (fdmlink) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:fdmlink emulator EXTRUDER_COUNT:1",
                "Cap:SERIAL_XON_XOFF:0",
                "Cap:EEPROM:1",
                "Cap:AUTOREPORT_TEMP:1",
                "Cap:AUTOLEVEL:0",
                "ok",
            ]
            .join("\n"),
        }
    }
}

fn is_line_reset(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|v| v.eq_ignore_ascii_case("M110"))
}

/// Numeric value of the first `<letter><number>` word
fn word_value(args: &[&str], letter: char) -> Option<f64> {
    args.iter().find_map(|arg| {
        let mut chars = arg.chars();
        let first = chars.next()?;
        if first.eq_ignore_ascii_case(&letter) {
            chars.as_str().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::frame_line;
    use fdmlink_devicedb::classify;

    fn emulator() -> DeviceEmulator {
        DeviceEmulator::new(EmulatorSettings {
            seed: Some(7),
            ..Default::default()
        })
    }

    #[test]
    fn test_identification_classifies_per_dialect() {
        for dialect in Dialect::KNOWN {
            let emu = DeviceEmulator::new(EmulatorSettings {
                dialect,
                ..Default::default()
            });
            let reply = emu.process("M115");
            assert!(reply.ends_with("ok"), "{reply}");
            assert_eq!(classify(&reply).dialect, dialect, "{reply}");
        }
    }

    #[test]
    fn test_temperature_targets_and_report() {
        let emu = emulator();
        assert_eq!(emu.process("M104 S200"), "ok");
        assert_eq!(emu.process("M140 S60"), "ok");
        let report = emu.process("M105");
        assert!(report == "ok T:22.00/200.00 B:22.00/60.00", "{report}");
    }

    #[test]
    fn test_heating_is_asymmetric() {
        let emu = emulator();
        emu.process("M104 S200");
        emu.process("M140 S60");
        emu.tick(Duration::from_secs(2));
        let t = emu.snapshot();
        assert_eq!(t.hotend_current, 22.0 + 16.0);
        assert_eq!(t.bed_current, 22.0 + 3.0);

        emu.process("M104 S0");
        emu.tick(Duration::from_secs(1));
        assert_eq!(emu.snapshot().hotend_current, 38.0 - 3.0);

        emu.tick(Duration::from_secs(600));
        assert_eq!(emu.snapshot().hotend_current, 22.0);
        assert_eq!(emu.snapshot().bed_current, 60.0);
    }

    #[test]
    fn test_moves_relative_and_absolute() {
        let emu = emulator();
        emu.process("G28");
        assert!(emu.is_homed());
        emu.process("G1 X10 Y20 Z0.3 F1500");
        emu.process("G91");
        emu.process("G1 X5 E1.5");
        let p = emu.position();
        assert_eq!((p.x, p.y, p.z, p.e), (15.0, 20.0, 0.3, 1.5));
        emu.process("G92 E0");
        assert_eq!(emu.position().e, 0.0);
        assert!(emu.process("M114") == "ok X:15.00 Y:20.00 Z:0.30 E:0.00");
    }

    #[test]
    fn test_line_numbering_and_checksums() {
        let emu = emulator();
        assert_eq!(emu.process("M110 N0"), "ok");
        assert_eq!(emu.process(&frame_line(1, "G28")), "ok");
        assert_eq!(
            emu.process(&frame_line(3, "G1 X1")),
            "Error:Line Number is not Last Line Number+1, Last Line: 1"
        );
        assert_eq!(
            emu.process("N2 G1 X1*0"),
            "Error:checksum mismatch, Last Line: 1"
        );
        assert_eq!(emu.process(&frame_line(2, "G1 X1")), "ok");
    }

    #[test]
    fn test_kill_halts_until_reset() {
        let emu = emulator();
        emu.process("M104 S210");
        assert_eq!(emu.process("M112"), HALTED);
        assert!(emu.is_halted());
        assert_eq!(emu.snapshot().hotend_target, 0.0);
        assert_eq!(emu.process("G28"), HALTED);
        assert_eq!(emu.process("M999"), "ok");
        assert_eq!(emu.process("G28"), "ok");
    }

    #[test]
    fn test_fan_and_unknown_commands() {
        let emu = emulator();
        emu.process("M106 S128");
        assert_eq!(emu.fan_speed(), 128);
        emu.process("M107");
        assert_eq!(emu.fan_speed(), 0);
        assert_eq!(emu.process("M9999 Q1"), "ok");
    }

    #[test]
    fn test_seeded_error_injection_is_reproducible() {
        let settings = EmulatorSettings {
            error_probability: 0.5,
            seed: Some(42),
            ..Default::default()
        };
        let a = DeviceEmulator::new(settings.clone());
        let b = DeviceEmulator::new(settings);
        let run = |emu: &DeviceEmulator| -> Vec<String> {
            (0..32).map(|i| emu.process(&format!("G1 X{}", i))).collect()
        };
        let ra = run(&a);
        assert_eq!(ra, run(&b));
        assert!(ra.iter().any(|r| r.starts_with("Error:")));
        assert!(ra.iter().any(|r| r == "ok"));
        assert!(a.process("M115").ends_with("ok"));
    }

    #[tokio::test]
    async fn test_unplugged_swallows_lines() {
        let emu = emulator();
        emu.set_unplugged(true);
        assert_eq!(emu.respond("M104 S200").await, "");
        assert_eq!(emu.snapshot().hotend_target, 0.0);
        emu.set_unplugged(false);
        assert_eq!(emu.respond("M104 S200").await, "ok");
    }
}
