//! Scanner bounds and classification with a fake port prober

use fdmlink_communication::{PortProber, PrinterEngine, Scanner};
use fdmlink_core::{Dialect, Result};
use fdmlink_devicedb::ProfileRegistry;
use fdmlink_settings::{Config, ScanSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ENDER3: &str = "FIRMWARE_NAME:Marlin 1.1.9 (Github) SOURCE_CODE_URL:https://github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:Ender-3 EXTRUDER_COUNT:1 UUID:cede2a2f-41a2-4748-9b12-c55c62f367ff\nok";

/// Every port hangs far longer than any timeout
struct StuckPorts(usize);

impl PortProber for StuckPorts {
    fn candidates(&self) -> Result<Vec<String>> {
        Ok((0..self.0).map(|i| format!("/dev/ttyUSB{}", i)).collect())
    }

    fn probe(&self, _port: &str, _baud_rate: u32, _wait: Duration) -> Option<String> {
        std::thread::sleep(Duration::from_secs(2));
        None
    }
}

/// One Ender-3 among silent ports
struct OneEnder;

impl PortProber for OneEnder {
    fn candidates(&self) -> Result<Vec<String>> {
        Ok(vec![
            "/dev/ttyACM0".to_string(),
            "/dev/ttyUSB0".to_string(),
            "/dev/ttyUSB1".to_string(),
        ])
    }

    fn probe(&self, port: &str, baud_rate: u32, _wait: Duration) -> Option<String> {
        (port == "/dev/ttyUSB1" && baud_rate == 115200).then(|| ENDER3.to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hard_timeout_bounds_scan() {
    let settings = ScanSettings {
        per_port_timeout_ms: 5000,
        hard_timeout_ms: 400,
        enhanced_fallback: false,
        ..Default::default()
    };
    let scanner = Scanner::with_prober(
        settings,
        Arc::new(ProfileRegistry::new()),
        Arc::new(StuckPorts(24)),
    );

    let started = Instant::now();
    let devices = scanner.scan_with_fallback().await.unwrap();
    let took = started.elapsed();

    assert!(devices.is_empty());
    assert!(took < Duration::from_millis(1200), "scan took {:?}", took);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fallback_pass_shares_the_hard_timeout() {
    let mut config = Config::default();
    config.scan = ScanSettings {
        per_port_timeout_ms: 300,
        hard_timeout_ms: 800,
        ..Default::default()
    };
    assert!(config.scan.enhanced_fallback);
    let engine = PrinterEngine::with_components(
        config,
        Arc::new(ProfileRegistry::new()),
        Arc::new(StuckPorts(8)),
    );

    let started = Instant::now();
    let devices = engine.scan_devices(false).await.unwrap();
    let took = started.elapsed();

    assert!(devices.is_empty());
    assert!(took < Duration::from_millis(1300), "scan took {:?}", took);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_port_timeout_drops_silent_ports() {
    let settings = ScanSettings {
        per_port_timeout_ms: 200,
        hard_timeout_ms: 5000,
        enhanced_fallback: false,
        ..Default::default()
    };
    let scanner = Scanner::with_prober(
        settings,
        Arc::new(ProfileRegistry::new()),
        Arc::new(StuckPorts(3)),
    );

    let started = Instant::now();
    assert!(scanner.scan().await.unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_scan_selects_ender3_profile() {
    let registry = Arc::new(ProfileRegistry::new());
    let engine = PrinterEngine::with_components(
        Config::default(),
        Arc::clone(&registry),
        Arc::new(OneEnder),
    );

    let devices = engine.scan_devices(false).await.unwrap();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.port, "/dev/ttyUSB1");
    assert_eq!(device.baud_rate, 115200);
    assert_eq!(device.dialect, Dialect::Marlin);
    assert_eq!(device.name, "Ender-3");

    let profile = registry
        .get(device.profile_name.as_deref().unwrap())
        .unwrap();
    assert_eq!(profile.build_volume.x, 220.0);
    assert_eq!(profile.build_volume.y, 220.0);
    assert_eq!(profile.build_volume.z, 250.0);
}
