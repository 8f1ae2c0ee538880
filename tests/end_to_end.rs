//! Config file to finished print, through the caller-facing service

use fdmlink::{Config, JobStatus, PrinterEngine, PrinterService};
use std::io::Write;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_print_from_toml_config_on_emulator() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[connection]
use_emulator = true
monitor_interval_ms = 200

[streaming]
checksums = true
chunk_size = 2

[emulator]
tick_interval_ms = 50
"#,
    )
    .unwrap();
    let config = Config::load_from_file(&config_path).unwrap();
    assert!(config.connection.use_emulator);

    let gcode_path = dir.path().join("cube.gcode");
    let mut gcode = std::fs::File::create(&gcode_path).unwrap();
    writeln!(gcode, ";FLAVOR:Marlin").unwrap();
    writeln!(gcode, "G28").unwrap();
    writeln!(gcode, ";LAYER:0").unwrap();
    writeln!(gcode, "G1 Z0.2 F600").unwrap();
    writeln!(gcode, "G1 X10 Y10 E0.5").unwrap();
    writeln!(gcode, ";LAYER:1").unwrap();
    writeln!(gcode, "G1 Z0.4").unwrap();
    drop(gcode);

    let service = PrinterService::new(PrinterEngine::new(config));
    let connected = service.connect(None, None).await;
    assert!(connected.success, "{}", connected.message);

    let started = service.stream_gcode(&gcode_path, None).await;
    assert!(started.success, "{}", started.message);
    let job_id = started.data.unwrap();

    let job = service
        .engine()
        .wait_for_job(&job_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.lines_sent, 6);
    assert_eq!(job.current_layer, 1);

    let progress = service.get_progress();
    assert!(progress.success);
    assert_eq!(progress.data.unwrap().progress_percent, 100.0);
    assert!(service.disconnect().await.success);
}
