use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fdmlink::{
    init_logging, Config, JobStatus, LogFormat, PrintJob, PrinterEngine, ProfileRegistry,
    ProgressCallback, BUILD_DATE, EMULATOR_PORT, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn long_version() -> &'static str {
    static LONG_VERSION: OnceLock<String> = OnceLock::new();
    LONG_VERSION.get_or_init(|| format!("{} (built {})", VERSION, BUILD_DATE))
}

#[derive(Parser)]
#[command(name = "fdmlink")]
#[command(version, long_version = long_version())]
#[command(about = "Talk to FDM 3D printers over serial", long_about = None)]
struct Cli {
    /// Configuration file (.toml or .json); defaults to the user config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    /// Serial port, "Auto" to scan, or "emulator"
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate; defaults to the configured one
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use the built-in printer emulator
    #[arg(long)]
    emulate: bool,
}

impl Target {
    fn port(&self) -> Option<&str> {
        if self.emulate {
            Some(EMULATOR_PORT)
        } else {
            self.port.as_deref()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan serial ports for printers
    Scan {
        /// Go straight to the slow pass (more baud rates, retries)
        #[arg(long)]
        enhanced: bool,
    },
    /// List the built-in printer profiles
    Profiles,
    /// Send one command and print the reply
    Send {
        /// Command text, e.g. "M105"
        command: String,
        #[command(flatten)]
        target: Target,
    },
    /// Stream a G-code file; Ctrl-C triggers an emergency stop
    Print {
        /// Sliced G-code file
        file: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    /// Connect, print the engine status as JSON, and disconnect
    Status {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    })?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { enhanced } => scan(config, enhanced).await,
        Commands::Profiles => {
            list_profiles();
            Ok(())
        }
        Commands::Send { command, target } => send(config, &command, &target).await,
        Commands::Print { file, target } => print(config, &file, &target).await,
        Commands::Status { target } => status(config, &target).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match Config::default_path() {
            Ok(path) => Config::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            Err(e) => {
                tracing::debug!("No default config location: {}", e);
                Config::default()
            }
        },
    };
    Ok(config)
}

async fn scan(config: Config, enhanced: bool) -> Result<()> {
    let engine = PrinterEngine::new(config);
    let devices = engine.scan_devices(enhanced).await?;
    if devices.is_empty() {
        println!("No printers found");
        return Ok(());
    }
    for device in devices {
        println!(
            "{:<24} {:>7} baud  {:<16} {:<28} {}",
            device.port,
            device.baud_rate,
            device.dialect,
            device.name,
            device.profile_name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn list_profiles() {
    let registry = ProfileRegistry::new();
    let mut profiles: Vec<_> = registry.all().collect();
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    for profile in profiles {
        println!(
            "{:<24} {:<16} {:<28} {}",
            profile.name,
            profile.dialect,
            profile.display_name(),
            profile.build_volume
        );
    }
}

async fn connect(config: Config, target: &Target) -> Result<PrinterEngine> {
    let engine = PrinterEngine::new(config);
    let info = engine.connect(target.port(), target.baud).await?;
    println!(
        "Connected to {} on {} ({}, profile {})",
        info.name, info.port, info.dialect, info.profile_name
    );
    Ok(engine)
}

async fn send(config: Config, command: &str, target: &Target) -> Result<()> {
    let engine = connect(config, target).await?;
    let result = engine.send_command(command).await;
    engine.disconnect().await?;
    println!("{}", result?);
    Ok(())
}

async fn status(config: Config, target: &Target) -> Result<()> {
    let engine = connect(config, target).await?;
    if let Some(profile) = engine.profile() {
        for command in [
            &profile.commands.temperature_report,
            &profile.commands.position_report,
        ] {
            if let Err(e) = engine.send_command(command).await {
                tracing::warn!("'{}' failed: {}", command, e);
            }
        }
    }
    let status = engine.get_status();
    engine.disconnect().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn print(config: Config, file: &Path, target: &Target) -> Result<()> {
    let engine = connect(config, target).await?;
    let callback: ProgressCallback = Arc::new(|job: &PrintJob| {
        println!(
            "{:>6.1}%  line {}/{}  layer {}  {:.0}s elapsed{}",
            job.progress_percent,
            job.lines_sent,
            job.total_lines,
            job.current_layer,
            job.elapsed_time,
            job.estimated_remaining
                .map(|r| format!(", ~{:.0}s left", r))
                .unwrap_or_default()
        );
    });
    let job_id = engine.stream_gcode(file, Some(callback)).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let job = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                eprintln!("Interrupted, stopping the printer");
                engine.emergency_stop().await?;
                break engine.get_job(&job_id);
            }
            job = engine.wait_for_job(&job_id, Duration::from_millis(500)) => {
                if job.as_ref().is_none_or(|j| j.is_terminal()) {
                    break job;
                }
            }
        }
    };
    engine.disconnect().await?;

    let Some(job) = job else {
        anyhow::bail!("job {} disappeared", job_id);
    };
    println!(
        "Job {}: {} lines sent, {} failed, {:.0}s",
        job.status, job.lines_sent, job.failed_lines, job.elapsed_time
    );
    if job.status != JobStatus::Completed {
        anyhow::bail!(
            "print did not complete: {}",
            job.error.as_deref().unwrap_or(&job.status.to_string())
        );
    }
    Ok(())
}
