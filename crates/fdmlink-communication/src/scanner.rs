//! Port/device scanner
//!
//! Probes every USB-serial candidate on the blocking pool, classifies any
//! reply, and returns the detected printers ranked by confidence. Each port
//! has its own timeout and the whole scan is bounded by a hard deadline, so
//! a port that never answers is dropped instead of stalling the scan.

use crate::communication::serial::{list_ports, probe_port};
use fdmlink_core::{Dialect, Result};
use fdmlink_devicedb::{classify, ProfileRegistry};
use fdmlink_settings::ScanSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Lines written to a port to provoke a reply
pub const PROBE_LINES: [&str; 3] = ["", "M115", "M105"];

/// A printer found by a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedDevice {
    pub port: String,
    /// Baud rate the reply arrived at
    pub baud_rate: u32,
    /// Raw reply text
    pub response: String,
    pub dialect: Dialect,
    pub confidence: f32,
    /// Best matching profile
    pub profile_name: Option<String>,
    /// Human-readable name
    pub name: String,
}

/// Source of candidate ports and blocking probes
pub trait PortProber: Send + Sync + 'static {
    /// Ports worth probing
    fn candidates(&self) -> Result<Vec<String>>;

    /// Blocking probe of one port at one baud rate
    fn probe(&self, port: &str, baud_rate: u32, wait: Duration) -> Option<String>;
}

/// Probes real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialProber;

impl PortProber for SerialProber {
    fn candidates(&self) -> Result<Vec<String>> {
        Ok(list_ports()?.into_iter().map(|p| p.port_name).collect())
    }

    fn probe(&self, port: &str, baud_rate: u32, wait: Duration) -> Option<String> {
        probe_port(port, baud_rate, &PROBE_LINES, wait)
    }
}

#[derive(Debug, Clone)]
struct Pass {
    baud_rates: Vec<u32>,
    attempts: u32,
    wait: Duration,
    per_port_timeout: Duration,
}

/// Scans ports for printers
pub struct Scanner {
    prober: Arc<dyn PortProber>,
    registry: Arc<ProfileRegistry>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(settings: ScanSettings, registry: Arc<ProfileRegistry>) -> Self {
        Self::with_prober(settings, registry, Arc::new(SerialProber))
    }

    pub fn with_prober(
        settings: ScanSettings,
        registry: Arc<ProfileRegistry>,
        prober: Arc<dyn PortProber>,
    ) -> Self {
        Self {
            prober,
            registry,
            settings,
        }
    }

    /// Fast pass: configured baud rates, one attempt each
    pub async fn scan(&self) -> Result<Vec<DetectedDevice>> {
        self.run(self.fast_pass(), self.deadline()).await
    }

    /// Slow pass for non-compliant hardware: more baud rates, retries and
    /// longer waits
    pub async fn scan_enhanced(&self) -> Result<Vec<DetectedDevice>> {
        self.run(self.enhanced_pass(), self.deadline()).await
    }

    /// Fast pass, then the enhanced pass if nothing answered and the
    /// fallback is enabled. Both passes share one hard deadline.
    pub async fn scan_with_fallback(&self) -> Result<Vec<DetectedDevice>> {
        let deadline = self.deadline();
        let found = self.run(self.fast_pass(), deadline).await?;
        if found.is_empty() && self.settings.enhanced_fallback {
            if Instant::now() >= deadline {
                tracing::info!("Fast scan found nothing and used up the hard timeout");
                return Ok(found);
            }
            tracing::info!("Fast scan found nothing, trying enhanced scan");
            return self.run(self.enhanced_pass(), deadline).await;
        }
        Ok(found)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.settings.hard_timeout()
    }

    fn fast_pass(&self) -> Pass {
        let per_port = self.settings.per_port_timeout();
        Pass {
            baud_rates: self.settings.baud_rates.clone(),
            attempts: 1,
            wait: per_port,
            per_port_timeout: per_port,
        }
    }

    fn enhanced_pass(&self) -> Pass {
        let wait = self.settings.enhanced_wait();
        let attempts = self.settings.enhanced_retries.max(1);
        let rates = self.settings.enhanced_baud_rates.clone();
        let per_port = wait * attempts * rates.len().max(1) as u32;
        Pass {
            baud_rates: rates,
            attempts,
            wait,
            per_port_timeout: per_port,
        }
    }

    async fn run(&self, pass: Pass, deadline: Instant) -> Result<Vec<DetectedDevice>> {
        let started = Instant::now();
        let prober = Arc::clone(&self.prober);
        let candidates = tokio::task::spawn_blocking(move || prober.candidates())
            .await
            .map_err(|e| fdmlink_core::Error::other(format!("port enumeration failed: {}", e)))??;
        tracing::info!("Scanning {} candidate port(s)", candidates.len());

        let mut probes = JoinSet::new();
        for port in candidates {
            let prober = Arc::clone(&self.prober);
            let pass = pass.clone();
            let per_port_timeout = pass.per_port_timeout;
            probes.spawn(async move {
                let port_for_probe = port.clone();
                let probe = tokio::task::spawn_blocking(move || {
                    probe_rates(prober.as_ref(), &port_for_probe, &pass)
                });
                match tokio::time::timeout(per_port_timeout, probe).await {
                    Ok(Ok(found)) => found,
                    Ok(Err(e)) => {
                        tracing::warn!("Probe of {} panicked: {}", port, e);
                        None
                    }
                    Err(_) => {
                        tracing::debug!("Probe of {} timed out", port);
                        None
                    }
                }
            });
        }

        let mut replies = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok(Some(reply)))) => replies.push(reply),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(e))) => tracing::warn!("Probe task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Scan hit its {:?} hard timeout, dropping {} unfinished probe(s)",
                        self.settings.hard_timeout(),
                        probes.len()
                    );
                    probes.abort_all();
                    break;
                }
            }
        }

        let mut devices: Vec<DetectedDevice> = replies
            .into_iter()
            .map(|(port, baud_rate, response)| self.describe(port, baud_rate, response))
            .collect();
        devices.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.port.cmp(&b.port))
        });
        tracing::info!(
            "Scan found {} device(s) in {:?}",
            devices.len(),
            started.elapsed()
        );
        Ok(devices)
    }

    fn describe(&self, port: String, baud_rate: u32, response: String) -> DetectedDevice {
        let classification = classify(&response);
        let (profile_name, name) = if classification.is_known() {
            let matched = self
                .registry
                .best_match(classification.dialect, classification.machine_type.as_deref());
            let name = classification
                .machine_type
                .clone()
                .unwrap_or_else(|| matched.profile.display_name());
            (Some(matched.profile.name), name)
        } else {
            (None, format!("Unknown device on {}", port))
        };
        DetectedDevice {
            port,
            baud_rate,
            response,
            dialect: classification.dialect,
            confidence: classification.confidence,
            profile_name,
            name,
        }
    }
}

fn probe_rates(prober: &dyn PortProber, port: &str, pass: &Pass) -> Option<(String, u32, String)> {
    for baud in &pass.baud_rates {
        for attempt in 1..=pass.attempts {
            if let Some(reply) = prober.probe(port, *baud, pass.wait) {
                if is_meaningful(&reply) {
                    return Some((port.to_string(), *baud, reply));
                }
                tracing::debug!("{}@{} attempt {}: noise only", port, baud, attempt);
            }
        }
    }
    None
}

/// A reply with at least one printable word, not line noise at the wrong baud.
/// Whitespace counts for neither side.
fn is_meaningful(reply: &str) -> bool {
    let visible = reply.chars().filter(|c| !c.is_whitespace()).count();
    let printable = reply.chars().filter(|c| c.is_ascii_graphic()).count();
    printable >= 2 && printable * 2 >= visible
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProber {
        ports: Vec<(&'static str, u32, &'static str)>,
    }

    impl PortProber for ScriptedProber {
        fn candidates(&self) -> Result<Vec<String>> {
            let mut ports: Vec<String> = self.ports.iter().map(|p| p.0.to_string()).collect();
            ports.push("/dev/ttyUSB9".to_string());
            Ok(ports)
        }

        fn probe(&self, port: &str, baud_rate: u32, _wait: Duration) -> Option<String> {
            self.ports
                .iter()
                .find(|(p, b, _)| *p == port && *b == baud_rate)
                .map(|(_, _, reply)| reply.to_string())
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            per_port_timeout_ms: 200,
            hard_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scan_ranks_and_classifies() {
        let prober = ScriptedProber {
            ports: vec![
                ("/dev/ttyACM0", 250000, "FIRMWARE_NAME:Klipper FIRMWARE_VERSION:v0.12\nok"),
                ("/dev/ttyUSB0", 115200, "echo: Marlin 2.0\nok"),
            ],
        };
        let scanner = Scanner::with_prober(settings(), Arc::new(ProfileRegistry::new()), Arc::new(prober));
        let devices = scanner.scan().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].dialect, Dialect::Klipper);
        assert_eq!(devices[0].baud_rate, 250000);
        assert_eq!(devices[0].profile_name.as_deref(), Some("generic-klipper"));
        assert_eq!(devices[1].dialect, Dialect::Marlin);
    }

    #[tokio::test]
    async fn test_enhanced_scan_tries_more_baud_rates() {
        let prober = ScriptedProber {
            ports: vec![("/dev/ttyUSB1", 57600, "FIRMWARE_NAME:Marlin 1.1.9\nok")],
        };
        let scanner = Scanner::with_prober(
            ScanSettings {
                enhanced_wait_ms: 10,
                ..settings()
            },
            Arc::new(ProfileRegistry::new()),
            Arc::new(prober),
        );
        let devices = scanner.scan_with_fallback().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].baud_rate, 57600);
    }

    #[test]
    fn test_noise_is_not_meaningful() {
        assert!(is_meaningful("ok"));
        assert!(!is_meaningful("\u{fffd}\u{fffd}\u{fffd}\u{fffd}x"));
        assert!(!is_meaningful("  "));
        assert!(!is_meaningful("\u{fffd} \u{fffd}"));
        assert!(!is_meaningful(" \r\n x \t"));
        assert!(is_meaningful("  ok\r\n"));
    }
}
